//! Mock implementations for testing
//!
//! Provides a scripted [`MockTransport`] and a manually driven
//! [`ManualScheduler`] so the reconnect logic can be exercised without a
//! broker and without waiting on real time.

use crate::events::{EventSender, InboundEvent, InboundSender};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::transport::mqtt::ConnectionConfig;
use crate::transport::{OutgoingMessage, QoS, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;

/// One request the client made of the transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect { host: String, client_id: String },
    Disconnect,
    Send(OutgoingMessage),
    Subscribe { topic: String, qos: QoS },
    Unsubscribe { topic: String },
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<TransportCall>,
    events: Option<EventSender>,
    unavailable: Option<String>,
    connect_error: Option<String>,
    connect_replies: VecDeque<TransportEvent>,
    failing_subscriptions: HashSet<String>,
    fail_send: bool,
}

/// Mock transport for testing
///
/// Clones share state, so a test keeps one handle for inspection and gives
/// the other to the client.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event as the most recently connected session would
    ///
    /// Returns false if `connect` was never called or the client is gone.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        match &self.state.lock().await.events {
            Some(events) => events.send(event),
            None => false,
        }
    }

    /// Event sender handed over by the latest `connect`
    pub async fn event_sender(&self) -> Option<EventSender> {
        self.state.lock().await.events.clone()
    }

    /// Queue an event to be emitted as soon as the next `connect` starts
    pub async fn reply_to_next_connect(&self, event: TransportEvent) {
        self.state.lock().await.connect_replies.push_back(event);
    }

    /// Make every future `connect` fail with `Unavailable`
    pub async fn set_unavailable(&self, reason: &str) {
        self.state.lock().await.unavailable = Some(reason.to_string());
    }

    /// Make every future `connect` fail synchronously with `ConnectFailed`
    pub async fn set_connect_error(&self, reason: Option<&str>) {
        self.state.lock().await.connect_error = reason.map(str::to_string);
    }

    pub async fn fail_subscribe(&self, topic: &str) {
        self.state
            .lock()
            .await
            .failing_subscriptions
            .insert(topic.to_string());
    }

    pub async fn fail_send(&self, fail: bool) {
        self.state.lock().await.fail_send = fail;
    }

    pub async fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn connect_count(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::Connect { .. }))
            .await
    }

    pub async fn subscribe_count(&self, topic: &str) -> usize {
        self.count(|call| matches!(call, TransportCall::Subscribe { topic: t, .. } if t == topic))
            .await
    }

    pub async fn sent_messages(&self) -> Vec<OutgoingMessage> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Send(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn clear_history(&self) {
        self.state.lock().await.calls.clear();
    }

    async fn count(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| predicate(call))
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &mut self,
        config: &ConnectionConfig,
        events: EventSender,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.calls.push(TransportCall::Connect {
            host: config.host.clone(),
            client_id: config.client_id.clone(),
        });

        if let Some(reason) = &state.unavailable {
            return Err(TransportError::Unavailable(reason.clone()));
        }
        if let Some(reason) = &state.connect_error {
            return Err(TransportError::ConnectFailed(reason.clone()));
        }

        if let Some(reply) = state.connect_replies.pop_front() {
            events.send(reply);
        }
        state.events = Some(events);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.calls.push(TransportCall::Disconnect);
        state.events = None;
        Ok(())
    }

    async fn send(&mut self, message: OutgoingMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.calls.push(TransportCall::Send(message));
        if state.fail_send {
            return Err(TransportError::RequestFailed(
                "Mock publish failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.calls.push(TransportCall::Subscribe {
            topic: topic.to_string(),
            qos,
        });
        if state.failing_subscriptions.contains(topic) {
            return Err(TransportError::RequestFailed(format!(
                "Mock subscribe failure for {topic}"
            )));
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.state
            .lock()
            .await
            .calls
            .push(TransportCall::Unsubscribe {
                topic: topic.to_string(),
            });
        Ok(())
    }
}

struct ManualTimer {
    delay: std::time::Duration,
    event: InboundEvent,
    deliver: InboundSender,
    cancelled: Arc<AtomicBool>,
    fired: bool,
}

#[derive(Default)]
struct ManualQueue {
    timers: Vec<ManualTimer>,
    history: Vec<std::time::Duration>,
}

/// Scheduler whose timers only fire when the test says so
#[derive(Clone, Default)]
pub struct ManualScheduler {
    queue: Arc<std::sync::Mutex<ManualQueue>>,
}

struct ManualTask {
    cancelled: Arc<AtomicBool>,
    queue: Arc<std::sync::Mutex<ManualQueue>>,
}

impl ScheduledTask for ManualTask {
    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_pending(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return false;
        }
        let queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue
            .timers
            .iter()
            .any(|timer| Arc::ptr_eq(&timer.cancelled, &self.cancelled) && !timer.fired)
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay of every timer ever scheduled, in order
    pub fn scheduled_delays(&self) -> Vec<std::time::Duration> {
        self.lock().history.clone()
    }

    /// Timers neither fired nor cancelled
    pub fn pending_count(&self) -> usize {
        self.lock()
            .timers
            .iter()
            .filter(|timer| !timer.fired && !timer.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Deliver the earliest pending timer; false if none is pending
    ///
    /// The event lands on the client's queue; the client still has to
    /// process it.
    pub fn fire_next(&self) -> bool {
        let mut queue = self.lock();
        let next = queue
            .timers
            .iter_mut()
            .filter(|timer| !timer.fired && !timer.cancelled.load(Ordering::SeqCst))
            .min_by_key(|timer| timer.delay);

        match next {
            Some(timer) => {
                timer.fired = true;
                timer.deliver.send(timer.event.clone()).is_ok()
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(
        &mut self,
        delay: std::time::Duration,
        event: InboundEvent,
        deliver: InboundSender,
    ) -> Box<dyn ScheduledTask> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut queue = self.lock();
        queue.history.push(delay);
        queue.timers.push(ManualTimer {
            delay,
            event,
            deliver,
            cancelled: cancelled.clone(),
            fired: false,
        });

        Box::new(ManualTask {
            cancelled,
            queue: self.queue.clone(),
        })
    }
}
