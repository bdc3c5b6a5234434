//! MQTT transport built on rumqttc
//!
//! This module separates pure functions from I/O so the connection lifecycle
//! can be tested without a broker.
//!
//! # Architecture
//!
//! - [`connection`] - Connection configuration, state, and backoff math
//! - [`health_monitor`] - Pure state-transition and reconnection decisions
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`client`] - Impure I/O: the rumqttc-backed [`MqttTransport`]
//!
//! # Usage
//!
//! ```rust,no_run
//! use dashlink::transport::mqtt::{ConnectionConfig, MqttTransport, ReconnectConfig};
//! use dashlink::{ReconnectingClient, TokioScheduler};
//!
//! # tokio_test::block_on(async {
//! let (mut client, _notifications) = ReconnectingClient::new(
//!     MqttTransport::new(),
//!     TokioScheduler,
//!     ReconnectConfig::default(),
//! )?;
//! client.connect(ConnectionConfig::default()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

// Re-export public types for convenience
pub use client::MqttTransport;
pub use connection::{
    configure_mqtt_options, ConnectionConfig, ConnectionProtocol, ConnectionState, Credentials,
    ReconnectConfig, RetryState, MAX_KEEP_ALIVE_SECS,
};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{EventRoute, MessageHandler};
