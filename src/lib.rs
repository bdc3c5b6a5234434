//! dashlink - reconnecting MQTT client for IoT dashboards
//!
//! Connects classroom and demo dashboards (temperature monitors, traffic
//! lights, smart-home panels) to an MQTT broker and keeps them connected.
//!
//! # Overview
//!
//! This crate provides:
//! - [`ReconnectingClient`], which retries failed connections with bounded
//!   exponential backoff and replays subscriptions after every reconnect
//! - A [`Transport`](transport::Transport) abstraction with a rumqttc-backed
//!   implementation over TCP or WebSockets
//! - Typed decoding of sensor readings and device commands
//! - Best-effort JSON persistence of settings and device states
//!
//! # Quick Start
//!
//! ```rust
//! use dashlink::protocol::{DeviceCommand, Payload, TopicKind};
//!
//! let payload = Payload::decode(TopicKind::Sensor, b"25.5,60.2").unwrap();
//! assert!(matches!(payload, Payload::Sensor(reading) if reading.humidity == 60.2));
//!
//! let command = Payload::decode(TopicKind::Device, b"ON").unwrap();
//! assert_eq!(command, Payload::Device(DeviceCommand::On));
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod observability;
pub mod protocol;
pub mod scheduler;
pub mod storage;
pub mod testing;
pub mod transport;

pub use client::{ClientStatus, ReconnectingClient, Subscription};
pub use config::{AppConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use events::{ClientNotification, InboundEvent};
pub use scheduler::{ScheduledTask, Scheduler, TokioScheduler};
pub use transport::mqtt::{ConnectionConfig, ConnectionState, MqttTransport, ReconnectConfig};
pub use transport::QoS;
