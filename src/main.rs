//! dashlink - command line entry point
//!
//! `run` keeps a dashboard session alive and records what arrives,
//! `publish` sends a single message, `config` validates and prints settings.

use dashlink::observability::init_default_logging;
use dashlink::protocol::{device_id, Payload, TopicKind, TopicMap};
use dashlink::storage::{self, DeviceStates, JsonStore};
use dashlink::{
    AppConfig, ClientNotification, ConnectionConfig, ConnectionState, MqttTransport, QoS,
    ReconnectingClient, TokioScheduler,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn, Instrument};

type Client = ReconnectingClient<MqttTransport, TokioScheduler>;

/// Reconnecting MQTT client for IoT dashboards
#[derive(Parser)]
#[command(name = "dashlink")]
#[command(about = "Reconnecting MQTT client for IoT classroom dashboards")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "DASHLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe to every configured topic and log what arrives
    Run,
    /// Publish one message and exit
    Publish {
        topic: String,
        payload: String,
        /// Quality of service (0, 1 or 2)
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: u8,
        /// Ask the broker to retain the message
        #[arg(long)]
        retain: bool,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_default_logging(cli.verbose > 0) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("Starting dashlink v{}", env!("CARGO_PKG_VERSION"));

    let (config, from_file) = match load_configuration(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => {
            run_dashboard(config, from_file)
                .instrument(dashlink::lifecycle_span!(command = "run"))
                .await
        }
        Commands::Publish {
            topic,
            payload,
            qos,
            retain,
        } => {
            publish_once(config, from_file, &topic, payload, qos, retain)
                .instrument(dashlink::lifecycle_span!(command = "publish"))
                .await
        }
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

/// Load the configuration and report whether it came from a file
fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<(AppConfig, bool), Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok((AppConfig::load_from_file(path)?, true))
        }
        None => {
            // Try default locations
            for path_str in ["dashlink.toml", "config/dashlink.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok((AppConfig::load_from_file(&path)?, true));
                }
            }

            info!("No configuration file found, using saved settings or the public broker defaults");
            Ok((AppConfig::default(), false))
        }
    }
}

/// Build the client and the resolved connection settings
fn build_client(
    config: &AppConfig,
    store: &JsonStore,
    from_file: bool,
) -> Result<(Client, tokio::sync::mpsc::UnboundedReceiver<ClientNotification>, ConnectionConfig), Box<dyn std::error::Error>> {
    let connection =
        storage::startup_connection(store, config.broker.to_connection_config(), !from_file)?;

    let (client, notifications) =
        ReconnectingClient::new(MqttTransport::new(), TokioScheduler, config.reconnect.clone())?;
    Ok((client, notifications, connection))
}

async fn run_dashboard(config: AppConfig, from_file: bool) -> Result<(), Box<dyn std::error::Error>> {
    let store = JsonStore::new(&config.storage.path);
    let topics = config.topic_map();
    let mut device_states = DeviceStates::load(&store);
    let (mut client, mut notifications, connection) = build_client(&config, &store, from_file)?;

    if topics.is_empty() {
        warn!("No sensor or device topics configured; nothing will be received");
    }
    for topic in topics.all_topics() {
        client.subscribe(topic, config.topics.default_qos).await?;
    }

    client.connect(connection.clone()).await?;

    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    info!("Dashboard session running, press Ctrl-C to stop");

    loop {
        tokio::select! {
            biased;
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            event = client.next_event() => {
                if let Some(event) = event {
                    client.handle_event(event).await;
                }
            }
        }

        while let Ok(notification) = notifications.try_recv() {
            handle_notification(notification, &topics, &mut device_states, &store, &connection);
        }

        if let ConnectionState::Failed(reason) = client.state() {
            error!("Connection permanently failed, shutting down: {}", reason);
            break;
        }
    }

    client.disconnect().await;
    device_states.save(&store)?;
    Ok(())
}

fn handle_notification(
    notification: ClientNotification,
    topics: &TopicMap,
    device_states: &mut DeviceStates,
    store: &JsonStore,
    connection: &ConnectionConfig,
) {
    match notification {
        ClientNotification::ConnectionChanged(true) => {
            info!(host = %connection.host, "Dashboard online");
            if let Err(e) = storage::save_settings(store, connection) {
                warn!("Failed to save connection settings: {}", e);
            }
        }
        ClientNotification::ConnectionChanged(false) => {
            warn!("Dashboard offline");
        }
        ClientNotification::StateChanged(state) => {
            debug!(?state, "Connection state changed");
        }
        ClientNotification::MessageReceived {
            topic,
            payload,
            retained,
        } => {
            let Some(kind) = topics.classify(&topic) else {
                info!(topic = %topic, retained, "Message on unmapped topic: {}", payload);
                return;
            };

            match Payload::decode(kind, payload.as_bytes()) {
                Ok(Payload::Sensor(reading)) => {
                    info!(
                        topic = %topic,
                        temperature = reading.temperature,
                        humidity = reading.humidity,
                        "Sensor reading"
                    );
                }
                Ok(Payload::Device(command)) => {
                    let id = device_id(&topic);
                    let status = device_states.apply(&id, command);
                    info!(device = %id, %command, ?status, "Device updated");
                    if let Err(e) = device_states.save(store) {
                        warn!("Failed to save device states: {}", e);
                    }
                }
                Err(e) => {
                    warn!(topic = %topic, ?kind, "Rejected payload '{}': {}", payload, e);
                }
            }
        }
        ClientNotification::Error(e) if e.is_retryable() => {
            warn!("{}", e);
        }
        ClientNotification::Error(e) => {
            error!("{}", e);
        }
    }
}

async fn publish_once(
    config: AppConfig,
    from_file: bool,
    topic: &str,
    payload: String,
    qos: u8,
    retain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = QoS::try_from(qos)?;
    let store = JsonStore::new(&config.storage.path);
    let topics = config.topic_map();

    // Device commands go out in their canonical lowercase form
    let payload = match topics.classify(topic) {
        Some(kind @ TopicKind::Device) => Payload::decode(kind, payload.as_bytes())?.encode()?,
        _ => payload.into_bytes().into(),
    };

    let (mut client, _notifications, connection) = build_client(&config, &store, from_file)?;
    client.connect(connection).await?;

    // Every retry plus some slack for the final attempt
    let budget = Duration::from_millis(config.reconnect.calculate_max_total_time())
        + Duration::from_secs(30);
    let outcome = tokio::time::timeout(budget, async {
        loop {
            match client.state() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Failed(reason) => return Err(reason.clone()),
                _ => client.process_next().await,
            }
        }
    })
    .await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(reason)) => return Err(format!("could not connect: {reason}").into()),
        Err(_) => return Err("timed out waiting for the broker".into()),
    }

    client.publish(topic, payload.clone(), qos, retain).await?;
    info!(topic, bytes = payload.len(), "Message published");

    if let Some(TopicKind::Device) = topics.classify(topic) {
        let command = Payload::decode(TopicKind::Device, &payload)?;
        if let Payload::Device(command) = command {
            let mut states = DeviceStates::load(&store);
            states.apply(&device_id(topic), command);
            states.save(&store)?;
        }
    }

    // Let the event loop flush the publish before closing
    client.process_pending().await;
    client.disconnect().await;
    Ok(())
}

fn handle_config_command(config: &AppConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", config.to_toml()?);
    }

    info!("Configuration validation complete");
    Ok(())
}
