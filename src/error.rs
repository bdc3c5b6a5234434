//! Error types for the reconnecting client
//!
//! Every failure is surfaced as a value: synchronous ones through
//! [`ClientResult`], asynchronous ones as
//! [`ClientNotification::Error`](crate::events::ClientNotification::Error).

use crate::protocol::topics::TopicError;
use crate::transport::mqtt::ConnectionState;
use thiserror::Error;

/// Main error type for client operations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClientError {
    /// Transport cannot be used at all (bad address, empty client id)
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Connection attempt {attempt} failed: {reason}")]
    ConnectFailure { attempt: u32, reason: String },

    /// Established connection ended abnormally
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Publish rejected: client is {state:?}, not connected")]
    PublishRejected { state: ConnectionState },

    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Subscribe to {topic} failed: {reason}")]
    SubscribeFailure { topic: String, reason: String },

    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error("Invalid reconnect configuration: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Only connect failures and abnormal losses are retried automatically
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectFailure { .. } | ClientError::ConnectionLost(_)
        )
    }

    /// Create connect failure error
    pub fn connect_failure<S: Into<String>>(attempt: u32, reason: S) -> Self {
        Self::ConnectFailure {
            attempt,
            reason: reason.into(),
        }
    }

    /// Create subscribe failure error
    pub fn subscribe_failure<T: Into<String>, S: Into<String>>(topic: T, reason: S) -> Self {
        Self::SubscribeFailure {
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
