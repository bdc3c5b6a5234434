//! Impure I/O operations for the MQTT transport
//!
//! This module owns the rumqttc client and its event loop task. It reports
//! what happens on the wire through the client's [`EventSender`] and never
//! retries on its own.

use super::connection::{configure_mqtt_options, ConnectionConfig};
use super::message_handler::{EventRoute, MessageHandler, SubscriptionTracker};
use crate::events::EventSender;
use crate::transport::{LossCode, OutgoingMessage, QoS, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// rumqttc-backed [`Transport`]
pub struct MqttTransport {
    client: Option<AsyncClient>,
    event_loop_handle: Option<JoinHandle<()>>,
    subscriptions: Arc<Mutex<SubscriptionTracker>>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self {
            client: None,
            event_loop_handle: None,
            subscriptions: Arc::new(Mutex::new(SubscriptionTracker::default())),
        }
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client.as_ref().ok_or(TransportError::NotStarted)
    }

    /// Drive the event loop until the connection ends
    ///
    /// Exactly one terminal event (`ConnectFailed` or `ConnectionLost`) is
    /// emitted unless the client stops listening first.
    async fn run_event_loop(
        mut event_loop: EventLoop,
        events: EventSender,
        subscriptions: Arc<Mutex<SubscriptionTracker>>,
    ) {
        let mut connected = false;

        loop {
            let event = match event_loop.poll().await {
                Ok(event) => event,
                Err(e) => {
                    debug!("MQTT event loop error: {}", e);
                    events.send(MessageHandler::classify_connection_error(&e, connected));
                    break;
                }
            };

            match MessageHandler::route_mqtt_event(&event) {
                EventRoute::ConnectionAcknowledged { session_present } => {
                    connected = true;
                    info!(session = events.session(), "MQTT ConnAck received");
                    events.send(TransportEvent::Connected { session_present });
                }
                EventRoute::MessageReceived {
                    topic,
                    payload,
                    retain,
                } => {
                    events.send(TransportEvent::MessageArrived {
                        topic,
                        payload,
                        retained: retain,
                    });
                }
                EventRoute::SubscribeSent(pkid) => {
                    subscriptions.lock().await.bind(pkid);
                }
                EventRoute::SubscriptionAcknowledged { pkid, failed } => {
                    let topic = subscriptions.lock().await.acknowledge(pkid);
                    if failed {
                        events.send(TransportEvent::SubscribeFailed {
                            topic: topic.unwrap_or_default(),
                            reason: "broker rejected subscription".to_string(),
                        });
                    }
                }
                EventRoute::DisconnectReceived => {
                    events.send(TransportEvent::ConnectionLost {
                        code: LossCode::Normal,
                        reason: "broker closed the session".to_string(),
                    });
                    break;
                }
                EventRoute::OutgoingDisconnect => {
                    events.send(TransportEvent::ConnectionLost {
                        code: LossCode::Normal,
                        reason: "client disconnected".to_string(),
                    });
                    break;
                }
                EventRoute::InfrastructureEvent(desc) => {
                    debug!("MQTT infrastructure event: {}", desc);
                }
                EventRoute::OutgoingEvent => {}
            }

            if !events.is_open() {
                debug!("Event receiver dropped, stopping MQTT event loop");
                break;
            }
        }

        info!(session = events.session(), "MQTT event loop stopped");
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(
        &mut self,
        config: &ConnectionConfig,
        events: EventSender,
    ) -> Result<(), TransportError> {
        let mqtt_options = configure_mqtt_options(config)?;

        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
        self.subscriptions.lock().await.clear();

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        info!(
            host = %config.host,
            port = config.port,
            client_id = %config.client_id,
            session = events.session(),
            "Starting MQTT connection"
        );

        let subscriptions = self.subscriptions.clone();
        self.event_loop_handle = Some(tokio::spawn(Self::run_event_loop(
            event_loop,
            events,
            subscriptions,
        )));
        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        if let Err(e) = client.disconnect().await {
            // Event loop already gone; nothing left to close
            debug!("MQTT disconnect request not delivered: {}", e);
        }

        if let Some(mut handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => info!("MQTT event loop shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("MQTT event loop task ended with error: {}", e);
                }
                Err(_) => {
                    warn!("MQTT event loop did not stop in time, forcing abort");
                    handle.abort();
                }
                _ => {}
            }
        }

        Ok(())
    }

    async fn send(&mut self, message: OutgoingMessage) -> Result<(), TransportError> {
        self.client()?
            .publish(
                message.topic,
                message.qos.into(),
                message.retained,
                message.payload.to_vec(),
            )
            .await
            .map_err(|e| TransportError::RequestFailed(e.to_string()))
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let client = self.client()?;
        self.subscriptions.lock().await.queue(topic);
        client
            .subscribe(topic, qos.into())
            .await
            .map_err(|e| TransportError::RequestFailed(e.to_string()))
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client()?
            .unsubscribe(topic)
            .await
            .map_err(|e| TransportError::RequestFailed(e.to_string()))
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}
