//! Reconnecting publish/subscribe client
//!
//! [`ReconnectingClient`] keeps one logical broker connection alive across
//! transient failures. It owns the connection state machine, the retry
//! bookkeeping and the subscription set. All asynchronous input (transport
//! callbacks and retry timers) arrives on a single inbound queue and is
//! applied in order by [`ReconnectingClient::handle_event`].
//!
//! Nothing is queued: publishing while not connected fails immediately.
//! Subscriptions are remembered and replayed after every successful connect.

use crate::error::{ClientError, ClientResult};
use crate::events::{ClientNotification, EventSender, InboundEvent, InboundSender};
use crate::protocol::topics::{validate_publish_topic, validate_topic_filter};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::transport::mqtt::{
    ConnectionConfig, ConnectionEvent, ConnectionState, HealthMonitor, ReconnectConfig,
    ReconnectionDecision, RetryState,
};
use crate::transport::{LossCode, OutgoingMessage, QoS, Transport, TransportError, TransportEvent};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

/// A remembered subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    pub qos: QoS,
}

/// Snapshot of the client for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStatus {
    pub state: ConnectionState,
    pub is_connected: bool,
    pub config: Option<ConnectionConfig>,
    pub subscriptions: Vec<Subscription>,
    pub retry: RetryState,
    pub connected_since: Option<DateTime<Utc>>,
    /// Retry attempts started since the client was created
    pub reconnect_count: u32,
}

/// Single-owner reconnecting client over a [`Transport`]
pub struct ReconnectingClient<T: Transport, S: Scheduler> {
    transport: T,
    scheduler: S,
    reconnect: ReconnectConfig,
    config: Option<ConnectionConfig>,
    state: ConnectionState,
    retry: RetryState,
    subscriptions: BTreeMap<String, QoS>,
    pending_retry: Option<Box<dyn ScheduledTask>>,
    retry_generation: u64,
    session: u64,
    inbound_tx: InboundSender,
    inbound_rx: mpsc::UnboundedReceiver<InboundEvent>,
    notifications: mpsc::UnboundedSender<ClientNotification>,
    connected_since: Option<DateTime<Utc>>,
    reconnect_count: u32,
}

impl<T: Transport, S: Scheduler> ReconnectingClient<T, S> {
    /// Create a disconnected client and the receiver for its notifications
    pub fn new(
        transport: T,
        scheduler: S,
        reconnect: ReconnectConfig,
    ) -> ClientResult<(Self, mpsc::UnboundedReceiver<ClientNotification>)> {
        HealthMonitor::validate_connection_config(&reconnect).map_err(ClientError::InvalidConfig)?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (notifications, notification_rx) = mpsc::unbounded_channel();

        let client = Self {
            transport,
            scheduler,
            retry: RetryState::new(&reconnect),
            reconnect,
            config: None,
            state: ConnectionState::Disconnected,
            subscriptions: BTreeMap::new(),
            pending_retry: None,
            retry_generation: 0,
            session: 0,
            inbound_tx,
            inbound_rx,
            notifications,
            connected_since: None,
            reconnect_count: 0,
        };

        Ok((client, notification_rx))
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn retry_state(&self) -> RetryState {
        self.retry
    }

    pub fn reconnect_config(&self) -> &ReconnectConfig {
        &self.reconnect
    }

    /// Remembered subscriptions, ordered by topic
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions
            .iter()
            .map(|(topic, qos)| Subscription {
                topic: topic.clone(),
                qos: *qos,
            })
            .collect()
    }

    pub fn status(&self) -> ClientStatus {
        ClientStatus {
            state: self.state.clone(),
            is_connected: self.state.is_connected(),
            config: self.config.clone(),
            subscriptions: self.subscriptions(),
            retry: self.retry,
            connected_since: self.connected_since,
            reconnect_count: self.reconnect_count,
        }
    }

    /// Start connecting with `config`
    ///
    /// Returns once the attempt is underway; the outcome is reported through
    /// notifications. Fails synchronously only when the transport cannot be
    /// used at all, which leaves the client `Failed`. Calling this while
    /// already connected (or connecting) with the same config is a no-op; a
    /// different config replaces the current connection.
    pub async fn connect(&mut self, config: ConnectionConfig) -> ClientResult<()> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                if self.config.as_ref() == Some(&config) {
                    debug!(state = ?self.state, "connect ignored: configuration unchanged");
                    return Ok(());
                }
                info!("Connection configuration changed, reconnecting");
                self.disconnect().await;
            }
            ConnectionState::Reconnecting(_) => self.cancel_retry(),
            ConnectionState::Disconnected | ConnectionState::Failed(_) => {}
        }

        self.config = Some(config);
        self.retry.reset(&self.reconnect);
        self.start_attempt(ConnectionEvent::ConnectRequested).await
    }

    /// Replace the configuration and connect again with a fresh retry budget
    pub async fn reconnect_with(&mut self, config: ConnectionConfig) -> ClientResult<()> {
        self.disconnect().await;
        self.connect(config).await
    }

    /// Caller-initiated disconnect
    ///
    /// Always ends in `Disconnected`, cancels any pending retry and keeps the
    /// subscription set. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        self.cancel_retry();
        if self.state == ConnectionState::Disconnected {
            debug!("disconnect ignored: already disconnected");
            return;
        }

        // Anything the old connection still reports is stale from here on
        self.session += 1;
        if let Err(e) = self.transport.disconnect().await {
            warn!("Transport disconnect failed: {}", e);
        }

        self.connected_since = None;
        self.apply(ConnectionEvent::DisconnectRequested);
    }

    /// Publish one message; never queued and never retried
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retained: bool,
    ) -> ClientResult<()> {
        validate_publish_topic(topic)?;
        if !HealthMonitor::can_publish(&self.state) {
            return Err(ClientError::PublishRejected {
                state: self.state.clone(),
            });
        }

        let message = OutgoingMessage {
            topic: topic.to_string(),
            payload: payload.into(),
            qos,
            retained,
        };
        debug!(topic, bytes = message.payload.len(), ?qos, retained, "Publishing");

        self.transport
            .send(message)
            .await
            .map_err(|e| ClientError::PublishFailed {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    /// Remember a subscription, issuing it now if connected
    ///
    /// Re-subscribing to a known topic replaces its QoS. If the immediate
    /// request fails the subscription stays remembered and is retried on the
    /// next connect.
    pub async fn subscribe(&mut self, topic: &str, qos: QoS) -> ClientResult<()> {
        validate_topic_filter(topic)?;
        self.subscriptions.insert(topic.to_string(), qos);

        if HealthMonitor::can_subscribe(&self.state) {
            self.transport
                .subscribe(topic, qos)
                .await
                .map_err(|e| ClientError::subscribe_failure(topic, e.to_string()))?;
        } else {
            debug!(topic, state = ?self.state, "Subscription deferred until connected");
        }
        Ok(())
    }

    /// Forget a subscription, removing it from the broker if connected
    pub async fn unsubscribe(&mut self, topic: &str) -> ClientResult<()> {
        validate_topic_filter(topic)?;
        self.subscriptions.remove(topic);

        if HealthMonitor::can_subscribe(&self.state) {
            self.transport
                .unsubscribe(topic)
                .await
                .map_err(|e| ClientError::subscribe_failure(topic, e.to_string()))?;
        }
        Ok(())
    }

    /// Wait for the next inbound event
    ///
    /// Cancel-safe, so it can sit in a `tokio::select!` next to other work.
    pub async fn next_event(&mut self) -> Option<InboundEvent> {
        self.inbound_rx.recv().await
    }

    /// Wait for one inbound event and apply it
    pub async fn process_next(&mut self) {
        if let Some(event) = self.next_event().await {
            self.handle_event(event).await;
        }
    }

    /// Apply every event already queued, returning how many were handled
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.inbound_rx.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Apply one inbound event to the state machine
    pub async fn handle_event(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::RetryTimer { generation } => self.on_retry_timer(generation).await,
            InboundEvent::Transport { session, event } => {
                if session != self.session {
                    debug!(
                        session,
                        current = self.session,
                        "Ignoring event from a previous connection"
                    );
                    return;
                }
                self.on_transport_event(event).await;
            }
        }
    }

    async fn start_attempt(&mut self, trigger: ConnectionEvent) -> ClientResult<()> {
        let Some(config) = self.config.clone() else {
            return Err(ClientError::TransportUnavailable(
                "no connection configuration".to_string(),
            ));
        };

        self.session += 1;
        self.apply(trigger);

        let span = crate::mqtt_span!(
            operation = "connect",
            host = %config.host,
            port = config.port,
            attempt = self.retry.attempt + 1
        );
        let events = EventSender::new(self.inbound_tx.clone(), self.session);
        let result = self
            .transport
            .connect(&config, events)
            .instrument(span)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(TransportError::Unavailable(reason)) => {
                warn!("Transport unavailable: {}", reason);
                self.apply(ConnectionEvent::PermanentFailure(reason.clone()));
                Err(ClientError::TransportUnavailable(reason))
            }
            Err(e) => {
                self.handle_connect_failure(e.to_string());
                Ok(())
            }
        }
    }

    async fn on_retry_timer(&mut self, generation: u64) {
        if generation != self.retry_generation
            || !matches!(self.state, ConnectionState::Reconnecting(_))
        {
            debug!(generation, state = ?self.state, "Ignoring stale retry timer");
            return;
        }

        self.pending_retry = None;
        self.reconnect_count += 1;
        info!(attempt = self.retry.attempt, "Retry timer fired, reconnecting");

        if let Err(e) = self.start_attempt(ConnectionEvent::RetryTimerFired).await {
            self.notify(ClientNotification::Error(e));
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { session_present } => {
                if !self.apply(ConnectionEvent::ConnAckReceived) {
                    return;
                }
                debug!(session_present, "Broker accepted connection");
                self.cancel_retry();
                self.retry.reset(&self.reconnect);
                self.connected_since = Some(Utc::now());
                self.resubscribe_all().await;
            }
            TransportEvent::ConnectFailed(reason) => {
                if self.state == ConnectionState::Connecting {
                    self.handle_connect_failure(reason);
                } else {
                    debug!(state = ?self.state, "Ignoring connect failure: {}", reason);
                }
            }
            TransportEvent::ConnectionLost { code, reason } => match self.state {
                ConnectionState::Connected => self.on_connection_lost(code, reason),
                // Dropped before the broker answered: counts as a failed attempt
                ConnectionState::Connecting => self.handle_connect_failure(reason),
                _ => debug!(state = ?self.state, "Ignoring connection loss: {}", reason),
            },
            TransportEvent::MessageArrived {
                topic,
                payload,
                retained,
            } => {
                debug!(topic = %topic, bytes = payload.len(), retained, "Message received");
                self.notify(ClientNotification::MessageReceived {
                    topic,
                    payload: String::from_utf8_lossy(&payload).into_owned(),
                    retained,
                });
            }
            TransportEvent::SubscribeFailed { topic, reason } => {
                warn!(topic = %topic, "Subscription rejected: {}", reason);
                self.notify(ClientNotification::Error(ClientError::subscribe_failure(
                    topic, reason,
                )));
            }
        }
    }

    fn on_connection_lost(&mut self, code: LossCode, reason: String) {
        self.connected_since = None;
        match code {
            LossCode::Normal => {
                info!("Connection closed cleanly: {}", reason);
                self.apply(ConnectionEvent::CleanDisconnect);
            }
            LossCode::Abnormal => {
                self.notify(ClientNotification::Error(ClientError::ConnectionLost(
                    reason,
                )));
                self.retry.reset(&self.reconnect);
                if let ReconnectionDecision::Proceed { attempt, delay_ms } =
                    HealthMonitor::reconnection_after_loss(&self.reconnect)
                {
                    self.schedule_retry(attempt, delay_ms);
                }
            }
        }
    }

    fn handle_connect_failure(&mut self, reason: String) {
        let failed_attempt = self.retry.attempt + 1;
        self.notify(ClientNotification::Error(ClientError::connect_failure(
            failed_attempt,
            reason.clone(),
        )));

        match HealthMonitor::should_attempt_reconnection(self.retry.attempt, &self.reconnect, false)
        {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.schedule_retry(attempt, delay_ms);
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded { attempts } => {
                self.cancel_retry();
                self.retry.attempt = attempts;
                self.apply(ConnectionEvent::PermanentFailure(format!(
                    "giving up after {attempts} failed attempts: {reason}"
                )));
            }
            ReconnectionDecision::AbortShutdownRequested => {
                self.cancel_retry();
                self.apply(ConnectionEvent::DisconnectRequested);
            }
        }
    }

    /// Enter `Reconnecting(attempt)` and arm the retry timer
    fn schedule_retry(&mut self, attempt: u32, delay_ms: u64) {
        if !self.apply(ConnectionEvent::ReconnectionScheduled(attempt)) {
            return;
        }

        self.cancel_retry();
        self.retry = RetryState {
            attempt,
            next_delay_ms: delay_ms,
        };
        self.retry_generation += 1;
        info!(attempt, delay_ms, "Reconnection scheduled");

        let task = self.scheduler.schedule(
            Duration::from_millis(delay_ms),
            InboundEvent::RetryTimer {
                generation: self.retry_generation,
            },
            self.inbound_tx.clone(),
        );
        self.pending_retry = Some(task);
    }

    /// Cancel the pending timer and invalidate any firing already queued
    fn cancel_retry(&mut self) {
        if let Some(mut task) = self.pending_retry.take() {
            if task.is_pending() {
                debug!("Cancelling pending retry");
            }
            task.cancel();
        }
        self.retry_generation += 1;
    }

    async fn resubscribe_all(&mut self) {
        let subscriptions = self.subscriptions();
        for Subscription { topic, qos } in &subscriptions {
            if let Err(e) = self.transport.subscribe(topic, *qos).await {
                warn!(topic = %topic, "Re-subscribe failed: {}", e);
                self.notify(ClientNotification::Error(ClientError::subscribe_failure(
                    topic.as_str(),
                    e.to_string(),
                )));
            }
        }
        if !subscriptions.is_empty() {
            info!(count = subscriptions.len(), "Subscriptions replayed");
        }
    }

    /// Apply a state-machine event; false when it does not apply
    fn apply(&mut self, event: ConnectionEvent) -> bool {
        match HealthMonitor::determine_next_state(&self.state, event.clone()) {
            Some(next) => {
                self.transition(next);
                true
            }
            None => {
                debug!(state = ?self.state, ?event, "Event does not apply in current state");
                false
            }
        }
    }

    fn transition(&mut self, next: ConnectionState) {
        if next == self.state {
            return;
        }

        HealthMonitor::log_state_transition(&self.state, &next);
        let was_connected = self.state.is_connected();
        self.state = next;

        self.notify(ClientNotification::StateChanged(self.state.clone()));
        if was_connected != self.state.is_connected() {
            self.notify(ClientNotification::ConnectionChanged(
                self.state.is_connected(),
            ));
        }
    }

    fn notify(&self, notification: ClientNotification) {
        if self.notifications.send(notification).is_err() {
            debug!("Notification receiver dropped");
        }
    }
}
