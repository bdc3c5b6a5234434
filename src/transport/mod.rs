//! Transport layer for broker communication
//!
//! This module provides the transport abstraction the reconnecting client is
//! written against, and the rumqttc-backed MQTT implementation.

use crate::events::EventSender;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod mqtt;

use mqtt::ConnectionConfig;

/// MQTT quality-of-service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Message handed to the transport for publishing
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retained: bool,
}

/// How a live connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossCode {
    /// Clean, requested disconnect - no automatic retry
    Normal,
    /// Network error, keep-alive timeout, broker kick - retried
    Abnormal,
}

/// Asynchronous notifications emitted by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker accepted the connection
    Connected { session_present: bool },
    /// Connection attempt was refused or the broker was unreachable
    ConnectFailed(String),
    /// An established connection ended
    ConnectionLost { code: LossCode, reason: String },
    /// Message arrived on a subscribed topic
    MessageArrived {
        topic: String,
        payload: Bytes,
        retained: bool,
    },
    /// Broker rejected a subscription
    SubscribeFailed { topic: String, reason: String },
}

/// Errors raised synchronously at the transport boundary
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Transport cannot be used at all with this configuration
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Transport not started - call connect first")]
    NotStarted,
}

/// Publish/subscribe transport capability
///
/// `connect` only initiates a connection; the outcome is reported through the
/// supplied [`EventSender`] as [`TransportEvent::Connected`] or
/// [`TransportEvent::ConnectFailed`]. Implementations must not retry on their
/// own - reconnection policy belongs to the client.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Start connecting with `config`, replacing any previous connection
    async fn connect(
        &mut self,
        config: &ConnectionConfig,
        events: EventSender,
    ) -> Result<(), TransportError>;

    /// Close the connection; must be safe to call when not connected
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Publish one message
    async fn send(&mut self, message: OutgoingMessage) -> Result<(), TransportError>;

    /// Request a subscription to a topic filter
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError>;

    /// Remove a subscription
    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError>;
}
