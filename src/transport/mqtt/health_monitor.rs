//! Pure state-transition and reconnection logic for the reconnecting client
//!
//! This module contains pure functions for reconnection decision making,
//! state-machine transitions, and connection-policy validation.

use super::connection::{ConnectionState, ReconnectConfig};
use tracing::{error, info, warn};

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide what follows a failed connection attempt (pure function)
    ///
    /// `current_attempts` is the number of retries already consumed. The
    /// failure that brings the count to `max_attempts` is terminal.
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        let attempt = current_attempts.saturating_add(1);
        if attempt >= config.max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded {
                attempts: config.max_attempts,
            };
        }

        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(current_attempts),
        }
    }

    /// Retry decision after an abnormal loss of an established connection
    ///
    /// The retry counter starts over, so the first retry uses the base delay.
    pub fn reconnection_after_loss(config: &ReconnectConfig) -> ReconnectionDecision {
        ReconnectionDecision::Proceed {
            attempt: 1,
            delay_ms: config.calculate_backoff_delay(0),
        }
    }

    /// Determine next state after a connection event (pure function)
    ///
    /// Returns `None` when the event does not apply in the current state; the
    /// caller ignores it.
    pub fn determine_next_state(
        current_state: &ConnectionState,
        event: ConnectionEvent,
    ) -> Option<ConnectionState> {
        use ConnectionState::*;

        match (current_state, event) {
            (_, ConnectionEvent::DisconnectRequested) => Some(Disconnected),
            (Disconnected | Failed(_) | Reconnecting(_), ConnectionEvent::ConnectRequested) => {
                Some(Connecting)
            }
            (Connecting, ConnectionEvent::ConnAckReceived) => Some(Connected),
            (Connecting | Connected, ConnectionEvent::ReconnectionScheduled(attempt)) => {
                Some(Reconnecting(attempt))
            }
            (Connecting | Reconnecting(_), ConnectionEvent::PermanentFailure(reason)) => {
                Some(Failed(reason))
            }
            (Reconnecting(_), ConnectionEvent::RetryTimerFired) => Some(Connecting),
            (Connected, ConnectionEvent::CleanDisconnect) => Some(Disconnected),
            _ => None,
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Check if connection state allows issuing subscriptions (pure function)
    pub fn can_subscribe(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    /// Log connection state transition (pure logging function)
    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionState::Connected, ConnectionState::Reconnecting(attempt)) => {
                warn!(attempt, "MQTT connection lost, scheduling reconnection");
            }
            (ConnectionState::Connecting, ConnectionState::Reconnecting(attempt)) => {
                warn!(attempt, "MQTT connection attempt failed, scheduling retry");
            }
            (_, ConnectionState::Failed(reason)) => {
                error!("MQTT connection permanently failed: {}", reason);
            }
            _ => {
                info!("MQTT connection state: {:?} -> {:?}", from, to);
            }
        }
    }

    /// Validate reconnection policy (pure function)
    pub fn validate_connection_config(config: &ReconnectConfig) -> Result<(), String> {
        if config.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }

        if config.base_delay_ms == 0 {
            return Err("base_delay_ms must be greater than 0".to_string());
        }

        if config.max_delay_ms < config.base_delay_ms {
            return Err(format!(
                "max_delay_ms ({}) must not be smaller than base_delay_ms ({})",
                config.max_delay_ms, config.base_delay_ms
            ));
        }

        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    /// Schedule a retry after `delay_ms`; `attempt` is the new retry count
    Proceed { attempt: u32, delay_ms: u64 },
    /// Abort reconnection - shutdown requested
    AbortShutdownRequested,
    /// Abort reconnection - max attempts reached
    AbortMaxAttemptsExceeded { attempts: u32 },
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Caller (or retry timer path) starts a connection attempt
    ConnectRequested,
    /// Broker accepted the connection
    ConnAckReceived,
    /// A retry was scheduled (new attempt count)
    ReconnectionScheduled(u32),
    /// No further automatic recovery
    PermanentFailure(String),
    /// Scheduled retry delay elapsed
    RetryTimerFired,
    /// Connection ended cleanly without caller involvement
    CleanDisconnect,
    /// Caller asked to disconnect
    DisconnectRequested,
}
