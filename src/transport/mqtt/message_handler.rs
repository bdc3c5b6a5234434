//! Pure message routing and processing logic for MQTT events
//!
//! This module contains pure functions for handling rumqttc events,
//! classifying event-loop errors, and routing decisions.

use crate::transport::{LossCode, TransportEvent};
use bytes::Bytes;
use rumqttc::{ConnectionError, Event, Outgoing, Packet, SubscribeReasonCode};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                },
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                    pkid: suback.pkid,
                    failed: !Self::validate_subscription_success(&suback.return_codes),
                },
                Packet::Disconnect => EventRoute::DisconnectReceived,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Subscribe(pkid)) => EventRoute::SubscribeSent(*pkid),
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::OutgoingDisconnect,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// True when every requested filter was granted (pure function)
    pub fn validate_subscription_success(return_codes: &[SubscribeReasonCode]) -> bool {
        !return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
    }

    /// Translate an event-loop error into a transport event (pure function)
    ///
    /// Before the broker acknowledged the connection, any error is a failed
    /// attempt. Afterwards it is an abnormal loss of the connection.
    pub fn classify_connection_error(error: &ConnectionError, connected: bool) -> TransportEvent {
        let reason = match error {
            ConnectionError::ConnectionRefused(code) => format!("connection refused: {code:?}"),
            other => other.to_string(),
        };

        if connected {
            TransportEvent::ConnectionLost {
                code: LossCode::Abnormal,
                reason,
            }
        } else {
            TransportEvent::ConnectFailed(reason)
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged { session_present: bool },
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// Subscribe request left the client with this packet id
    SubscribeSent(u16),
    /// Broker answered a subscribe request
    SubscriptionAcknowledged { pkid: u16, failed: bool },
    /// Broker closed the session
    DisconnectReceived,
    /// Our own disconnect request was flushed
    OutgoingDisconnect,
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Correlates SubAcks with the topic filters they answer
///
/// rumqttc hands requests to the event loop in order, so filters queued by
/// `subscribe` are bound to packet ids as the matching `Outgoing::Subscribe`
/// events appear.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    queued: VecDeque<String>,
    in_flight: HashMap<u16, String>,
}

impl SubscriptionTracker {
    pub fn queue(&mut self, topic: &str) {
        self.queued.push_back(topic.to_string());
    }

    /// Bind the oldest queued filter to `pkid`
    pub fn bind(&mut self, pkid: u16) {
        if let Some(topic) = self.queued.pop_front() {
            self.in_flight.insert(pkid, topic);
        } else {
            debug!(pkid, "Subscribe sent without a queued topic");
        }
    }

    /// Filter answered by the SubAck for `pkid`
    pub fn acknowledge(&mut self, pkid: u16) -> Option<String> {
        self.in_flight.remove(&pkid)
    }

    pub fn clear(&mut self) {
        self.queued.clear();
        self.in_flight.clear();
    }
}
