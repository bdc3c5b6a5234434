//! Pure connection state management for MQTT client
//!
//! This module contains the connection configuration, the connection state
//! machine's states, the backoff math, and the translation of a
//! [`ConnectionConfig`] into rumqttc options.

use crate::transport::TransportError;
use rumqttc::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Connection state for the reconnecting client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Initial state, and the state after a caller-requested disconnect
    Disconnected,
    /// Connection attempt in flight
    Connecting,
    /// Connected and ready for operations
    Connected,
    /// Waiting for a scheduled retry (attempt count)
    Reconnecting(u32),
    /// Retries exhausted or transport unusable - only an explicit connect leaves this state
    Failed(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Wire protocol used to reach the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionProtocol {
    /// Plain MQTT over TCP (`mqtt://`, or `mqtts://` with TLS)
    Tcp,
    /// MQTT over WebSockets (`ws://`, or `wss://` with TLS)
    #[default]
    WebSocket,
}

/// Username/password pair, never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Broker connection parameters
///
/// Serialized as a best-effort settings blob; missing fields fall back to the
/// defaults so partially saved blobs still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Client identifier; must be non-empty by the time a connection starts
    pub client_id: String,
    pub use_tls: bool,
    pub protocol: ConnectionProtocol,
    /// HTTP path of the WebSocket endpoint
    pub ws_path: String,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 8884,
            client_id: String::new(),
            use_tls: true,
            protocol: ConnectionProtocol::WebSocket,
            ws_path: "/mqtt".to_string(),
            keep_alive_secs: 60,
            clean_session: true,
            credentials: None,
        }
    }
}

impl ConnectionConfig {
    /// Broker address as a URL, e.g. `wss://broker.hivemq.com:8884/mqtt`
    pub fn broker_url(&self) -> Result<Url, TransportError> {
        let scheme = match (self.protocol, self.use_tls) {
            (ConnectionProtocol::Tcp, false) => "mqtt",
            (ConnectionProtocol::Tcp, true) => "mqtts",
            (ConnectionProtocol::WebSocket, false) => "ws",
            (ConnectionProtocol::WebSocket, true) => "wss",
        };
        let path = match self.protocol {
            ConnectionProtocol::Tcp => "",
            ConnectionProtocol::WebSocket => self.ws_path.as_str(),
        };
        let raw = format!("{scheme}://{}:{}{path}", self.host, self.port);
        let url = Url::parse(&raw)
            .map_err(|e| TransportError::Unavailable(format!("invalid broker address {raw}: {e}")))?;
        if url.host_str().map_or(true, str::is_empty) {
            return Err(TransportError::Unavailable(format!(
                "broker address {raw} has no host"
            )));
        }
        Ok(url)
    }
}

/// Reconnection policy: bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts after which the client gives up
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound for any single delay
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    /// Delay for the retry scheduled while `attempt` retries have already been used:
    /// `min(base * 2^attempt, max)`
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Total time spent waiting if every attempt fails
    pub fn calculate_max_total_time(&self) -> u64 {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.calculate_backoff_delay(attempt))
            .fold(0u64, u64::saturating_add)
    }
}

/// Retry bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryState {
    pub attempt: u32,
    pub next_delay_ms: u64,
}

impl RetryState {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            attempt: 0,
            next_delay_ms: config.calculate_backoff_delay(0),
        }
    }

    pub fn reset(&mut self, config: &ReconnectConfig) {
        *self = Self::new(config);
    }
}

/// Largest keep-alive the CONNECT packet can carry (a 16-bit field)
pub const MAX_KEEP_ALIVE_SECS: u64 = u16::MAX as u64;

/// Pure function to configure rumqttc options from a connection config
pub fn configure_mqtt_options(config: &ConnectionConfig) -> Result<MqttOptions, TransportError> {
    let client_id = config.client_id.trim();
    if client_id.is_empty() || client_id.len() != config.client_id.len() {
        return Err(TransportError::Unavailable(format!(
            "client id '{}' must be non-empty without surrounding whitespace",
            config.client_id
        )));
    }

    if config.keep_alive_secs > MAX_KEEP_ALIVE_SECS {
        return Err(TransportError::Unavailable(format!(
            "keep-alive of {}s exceeds the MQTT maximum of {MAX_KEEP_ALIVE_SECS}s",
            config.keep_alive_secs
        )));
    }

    let url = config.broker_url()?;

    let mut mqtt_options = match config.protocol {
        ConnectionProtocol::Tcp => {
            let host = url.host_str().unwrap_or(&config.host).to_string();
            let mut options = MqttOptions::new(client_id, host, config.port);
            if config.use_tls {
                options.set_transport(RumqttcTransport::tls_with_default_config());
            }
            options
        }
        ConnectionProtocol::WebSocket => {
            // rumqttc expects the full ws(s) URL in place of the host
            let mut options = MqttOptions::new(client_id, url.as_str(), config.port);
            if config.use_tls {
                options.set_transport(RumqttcTransport::wss_with_default_config());
            } else {
                options.set_transport(RumqttcTransport::Ws);
            }
            options
        }
    };

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_session(config.clean_session);

    if let Some(credentials) = &config.credentials {
        mqtt_options.set_credentials(&credentials.username, &credentials.password);
    }

    Ok(mqtt_options)
}
