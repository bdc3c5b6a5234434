//! Event plumbing between the transport, the retry timers, and the client
//!
//! Everything that can change client state arrives as an [`InboundEvent`] on a
//! single queue owned by the client, so state is only ever mutated from one
//! logical thread of control. Everything the client reports upward leaves as a
//! [`ClientNotification`].

use crate::error::ClientError;
use crate::transport::mqtt::ConnectionState;
use crate::transport::TransportEvent;
use tokio::sync::mpsc;

/// Events consumed by the client's single processing loop
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Asynchronous notification from the transport, tagged with the
    /// connection session that produced it
    Transport { session: u64, event: TransportEvent },
    /// A scheduled retry delay elapsed
    RetryTimer { generation: u64 },
}

/// Sending half of the client's inbound queue
pub type InboundSender = mpsc::UnboundedSender<InboundEvent>;

/// Session-scoped handle a transport uses to report events back to the client
///
/// Each connection attempt gets a fresh session id. Events from an older
/// session are discarded by the client, so a transport that keeps emitting
/// after being torn down cannot corrupt the current connection state.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: InboundSender,
    session: u64,
}

impl EventSender {
    pub fn new(tx: InboundSender, session: u64) -> Self {
        Self { tx, session }
    }

    /// Session this sender is bound to
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Deliver an event; returns false once the client has gone away
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(InboundEvent::Transport {
                session: self.session,
                event,
            })
            .is_ok()
    }

    /// True while the client is still listening
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Upward notifications for UI and application code
#[derive(Debug, Clone, PartialEq)]
pub enum ClientNotification {
    /// Connected flag flipped
    ConnectionChanged(bool),
    /// Any state machine transition, including entering `Failed`
    StateChanged(ConnectionState),
    /// Message arrived on a subscribed topic
    MessageReceived {
        topic: String,
        payload: String,
        retained: bool,
    },
    /// Asynchronous failure (connect failure, connection loss, re-subscribe failure)
    Error(ClientError),
}
