//! Reconnecting client lifecycle tests
//!
//! Drives the client through a scripted transport and a manual scheduler so
//! every retry is observable and no test waits on real time.

use bytes::Bytes;
use dashlink::testing::{ManualScheduler, MockTransport, TransportCall};
use dashlink::transport::{LossCode, TransportEvent};
use dashlink::{
    ClientError, ClientNotification, ConnectionConfig, ConnectionState, QoS, ReconnectConfig,
    ReconnectingClient,
};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

type TestClient = ReconnectingClient<MockTransport, ManualScheduler>;

struct Harness {
    client: TestClient,
    transport: MockTransport,
    scheduler: ManualScheduler,
    notifications: UnboundedReceiver<ClientNotification>,
}

impl Harness {
    fn new(reconnect: ReconnectConfig) -> Self {
        let transport = MockTransport::new();
        let scheduler = ManualScheduler::new();
        let (client, notifications) =
            ReconnectingClient::new(transport.clone(), scheduler.clone(), reconnect)
                .expect("valid reconnect policy");
        Self {
            client,
            transport,
            scheduler,
            notifications,
        }
    }

    fn with_three_attempts() -> Self {
        Self::new(ReconnectConfig {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 4000,
        })
    }

    async fn connack(&mut self) {
        assert!(
            self.transport
                .emit(TransportEvent::Connected {
                    session_present: false
                })
                .await
        );
        self.client.process_pending().await;
    }

    async fn connect_failed(&mut self, reason: &str) {
        assert!(
            self.transport
                .emit(TransportEvent::ConnectFailed(reason.to_string()))
                .await
        );
        self.client.process_pending().await;
    }

    async fn connection_lost(&mut self, code: LossCode) {
        assert!(
            self.transport
                .emit(TransportEvent::ConnectionLost {
                    code,
                    reason: "keep-alive timeout".to_string(),
                })
                .await
        );
        self.client.process_pending().await;
    }

    async fn fire_retry(&mut self) {
        assert!(self.scheduler.fire_next(), "a retry should be pending");
        self.client.process_pending().await;
    }

    fn drain(&mut self) -> Vec<ClientNotification> {
        let mut drained = Vec::new();
        while let Ok(notification) = self.notifications.try_recv() {
            drained.push(notification);
        }
        drained
    }
}

fn broker() -> ConnectionConfig {
    ConnectionConfig {
        host: "broker.local".to_string(),
        port: 1883,
        client_id: "dashboard_lab01".to_string(),
        use_tls: false,
        ..Default::default()
    }
}

fn millis(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_millis).collect()
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let mut h = Harness::with_three_attempts();

    h.client.connect(broker()).await.unwrap();
    h.connect_failed("connection refused").await;
    assert_eq!(h.client.state(), &ConnectionState::Reconnecting(1));

    h.fire_retry().await;
    assert_eq!(h.client.state(), &ConnectionState::Connecting);
    h.connect_failed("connection refused").await;
    assert_eq!(h.client.state(), &ConnectionState::Reconnecting(2));

    h.fire_retry().await;
    h.connect_failed("connection refused").await;

    assert!(matches!(h.client.state(), ConnectionState::Failed(_)));
    assert_eq!(h.client.retry_state().attempt, 3);
    assert_eq!(h.scheduler.scheduled_delays(), millis(&[500, 1000]));
    assert_eq!(h.scheduler.pending_count(), 0);
    assert_eq!(h.transport.connect_count().await, 3);

    let failures: Vec<u32> = h
        .drain()
        .into_iter()
        .filter_map(|n| match n {
            ClientNotification::Error(ClientError::ConnectFailure { attempt, .. }) => Some(attempt),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_failed_is_absorbing_until_connect() {
    let mut h = Harness::new(ReconnectConfig {
        max_attempts: 1,
        base_delay_ms: 500,
        max_delay_ms: 4000,
    });

    h.client.connect(broker()).await.unwrap();
    h.connect_failed("connection refused").await;
    assert!(matches!(h.client.state(), ConnectionState::Failed(_)));
    assert!(h.scheduler.scheduled_delays().is_empty());

    // Late transport noise must not revive the client
    h.connack().await;
    h.connection_lost(LossCode::Abnormal).await;
    assert!(matches!(h.client.state(), ConnectionState::Failed(_)));
    assert_eq!(h.transport.connect_count().await, 1);

    // An explicit connect starts over with a fresh budget
    h.client.connect(broker()).await.unwrap();
    assert_eq!(h.client.state(), &ConnectionState::Connecting);
    assert_eq!(h.client.retry_state().attempt, 0);
    h.connack().await;
    assert!(h.client.is_connected());
}

#[tokio::test]
async fn test_synchronous_connect_errors_follow_backoff() {
    let mut h = Harness::with_three_attempts();
    h.transport.set_connect_error(Some("dns lookup failed")).await;

    h.client.connect(broker()).await.unwrap();
    assert_eq!(h.client.state(), &ConnectionState::Reconnecting(1));

    h.fire_retry().await;
    assert_eq!(h.client.state(), &ConnectionState::Reconnecting(2));

    h.transport.set_connect_error(None).await;
    h.fire_retry().await;
    assert_eq!(h.client.state(), &ConnectionState::Connecting);
    h.connack().await;

    assert!(h.client.is_connected());
    assert_eq!(h.client.retry_state().attempt, 0);
    assert_eq!(h.client.status().reconnect_count, 2);
}

#[tokio::test]
async fn test_subscription_before_connect_is_sent_once() {
    let mut h = Harness::with_three_attempts();

    h.client.subscribe("sensor/dht22", QoS::AtMostOnce).await.unwrap();
    assert_eq!(h.transport.subscribe_count("sensor/dht22").await, 0);

    h.client.connect(broker()).await.unwrap();
    h.connack().await;

    assert_eq!(h.transport.subscribe_count("sensor/dht22").await, 1);
}

#[tokio::test]
async fn test_publish_requires_connection() {
    let mut h = Harness::with_three_attempts();

    let result = h
        .client
        .publish("casa/sala/luz1", "on", QoS::AtMostOnce, false)
        .await;
    assert_eq!(
        result,
        Err(ClientError::PublishRejected {
            state: ConnectionState::Disconnected
        })
    );

    h.client.connect(broker()).await.unwrap();
    let result = h
        .client
        .publish("casa/sala/luz1", "on", QoS::AtMostOnce, false)
        .await;
    assert!(matches!(result, Err(ClientError::PublishRejected { .. })));
    assert!(h.transport.sent_messages().await.is_empty());

    h.connack().await;
    h.client
        .publish("casa/sala/luz1", "on", QoS::AtLeastOnce, true)
        .await
        .unwrap();

    let sent = h.transport.sent_messages().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "casa/sala/luz1");
    assert_eq!(sent[0].payload, Bytes::from_static(b"on"));
    assert_eq!(sent[0].qos, QoS::AtLeastOnce);
    assert!(sent[0].retained);
}

#[tokio::test]
async fn test_publish_failure_is_reported() {
    let mut h = Harness::with_three_attempts();
    h.client.connect(broker()).await.unwrap();
    h.connack().await;
    h.transport.fail_send(true).await;

    let result = h
        .client
        .publish("sensor/dht22", "25.5,60.2", QoS::AtMostOnce, false)
        .await;
    assert!(matches!(result, Err(ClientError::PublishFailed { .. })));
    assert!(h.client.is_connected());
}

#[tokio::test]
async fn test_disconnect_cancels_pending_retry() {
    let mut h = Harness::with_three_attempts();

    h.client.connect(broker()).await.unwrap();
    h.connect_failed("connection refused").await;
    assert_eq!(h.client.state(), &ConnectionState::Reconnecting(1));
    assert_eq!(h.scheduler.pending_count(), 1);

    h.client.disconnect().await;
    assert_eq!(h.client.state(), &ConnectionState::Disconnected);
    assert_eq!(h.scheduler.pending_count(), 0);
    assert!(!h.scheduler.fire_next());

    h.client.process_pending().await;
    assert_eq!(h.client.state(), &ConnectionState::Disconnected);
    assert_eq!(h.transport.connect_count().await, 1);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let mut h = Harness::with_three_attempts();
    h.client.disconnect().await;
    h.client.disconnect().await;
    assert_eq!(h.client.state(), &ConnectionState::Disconnected);
    assert!(h.transport.calls().await.is_empty());

    h.client.connect(broker()).await.unwrap();
    h.connack().await;
    h.client.disconnect().await;
    h.client.disconnect().await;

    let disconnects = h
        .transport
        .calls()
        .await
        .into_iter()
        .filter(|call| *call == TransportCall::Disconnect)
        .count();
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn test_subscriptions_replayed_after_reconnect() {
    let mut h = Harness::with_three_attempts();
    h.client.connect(broker()).await.unwrap();
    h.connack().await;

    h.client.subscribe("t1", QoS::AtMostOnce).await.unwrap();
    h.client.subscribe("t2", QoS::AtLeastOnce).await.unwrap();
    h.transport.clear_history().await;

    h.connection_lost(LossCode::Abnormal).await;
    assert_eq!(h.client.state(), &ConnectionState::Reconnecting(1));
    h.fire_retry().await;
    h.connack().await;

    assert!(h.client.is_connected());
    assert_eq!(h.transport.subscribe_count("t1").await, 1);
    assert_eq!(h.transport.subscribe_count("t2").await, 1);
    assert!(h.transport.calls().await.contains(&TransportCall::Subscribe {
        topic: "t2".to_string(),
        qos: QoS::AtLeastOnce,
    }));
}

#[tokio::test]
async fn test_subscriptions_replayed_after_disconnect_and_connect() {
    let mut h = Harness::with_three_attempts();
    h.client.subscribe("t1", QoS::AtMostOnce).await.unwrap();
    h.client.subscribe("t2", QoS::AtMostOnce).await.unwrap();

    h.client.connect(broker()).await.unwrap();
    h.connack().await;
    h.client.disconnect().await;
    assert_eq!(h.client.state(), &ConnectionState::Disconnected);
    h.transport.clear_history().await;

    // The broker answers as soon as the new connection starts
    h.transport
        .reply_to_next_connect(TransportEvent::Connected {
            session_present: false,
        })
        .await;
    h.client.connect(broker()).await.unwrap();
    h.client.process_pending().await;

    assert!(h.client.is_connected());
    assert_eq!(h.transport.subscribe_count("t1").await, 1);
    assert_eq!(h.transport.subscribe_count("t2").await, 1);
    assert_eq!(h.transport.connect_count().await, 1);
}

#[tokio::test]
async fn test_abnormal_loss_retries_from_base_delay() {
    let mut h = Harness::with_three_attempts();

    // Burn some of the budget before the first successful connect
    h.client.connect(broker()).await.unwrap();
    h.connect_failed("connection refused").await;
    h.fire_retry().await;
    h.connack().await;
    assert_eq!(h.client.retry_state().attempt, 0);
    h.drain();

    h.connection_lost(LossCode::Abnormal).await;
    assert_eq!(h.client.state(), &ConnectionState::Reconnecting(1));
    assert_eq!(h.scheduler.scheduled_delays(), millis(&[500, 500]));

    let notifications = h.drain();
    assert!(notifications.contains(&ClientNotification::ConnectionChanged(false)));
    assert!(notifications
        .iter()
        .any(|n| matches!(n, ClientNotification::Error(ClientError::ConnectionLost(_)))));
}

#[tokio::test]
async fn test_clean_loss_does_not_retry() {
    let mut h = Harness::with_three_attempts();
    h.client.connect(broker()).await.unwrap();
    h.connack().await;

    h.connection_lost(LossCode::Normal).await;

    assert_eq!(h.client.state(), &ConnectionState::Disconnected);
    assert_eq!(h.scheduler.pending_count(), 0);
    assert!(h.scheduler.scheduled_delays().is_empty());
}

#[tokio::test]
async fn test_events_from_previous_connection_are_ignored() {
    let mut h = Harness::with_three_attempts();
    h.client.connect(broker()).await.unwrap();
    h.connack().await;
    let stale = h.transport.event_sender().await.expect("connected session");

    h.connection_lost(LossCode::Abnormal).await;
    h.fire_retry().await;
    h.connack().await;
    assert!(h.client.is_connected());

    assert!(stale.send(TransportEvent::ConnectionLost {
        code: LossCode::Abnormal,
        reason: "old socket closed".to_string(),
    }));
    h.client.process_pending().await;

    assert!(h.client.is_connected());
    assert_eq!(h.scheduler.pending_count(), 0);
}

#[tokio::test]
async fn test_resubscribe_failure_is_not_fatal() {
    let mut h = Harness::with_three_attempts();
    h.transport.fail_subscribe("bad/topic").await;
    h.client.subscribe("bad/topic", QoS::AtMostOnce).await.unwrap();
    h.client.subscribe("good/topic", QoS::AtMostOnce).await.unwrap();

    h.client.connect(broker()).await.unwrap();
    h.connack().await;

    assert!(h.client.is_connected());
    assert_eq!(h.transport.subscribe_count("good/topic").await, 1);
    assert_eq!(h.client.subscriptions().len(), 2);
    assert!(h.drain().iter().any(|n| matches!(
        n,
        ClientNotification::Error(ClientError::SubscribeFailure { topic, .. }) if topic == "bad/topic"
    )));
}

#[tokio::test]
async fn test_broker_rejected_subscription_is_reported() {
    let mut h = Harness::with_three_attempts();
    h.client.connect(broker()).await.unwrap();
    h.connack().await;
    h.drain();

    h.transport
        .emit(TransportEvent::SubscribeFailed {
            topic: "casa/#".to_string(),
            reason: "not authorized".to_string(),
        })
        .await;
    h.client.process_pending().await;

    assert!(h.client.is_connected());
    assert_eq!(
        h.drain(),
        vec![ClientNotification::Error(ClientError::SubscribeFailure {
            topic: "casa/#".to_string(),
            reason: "not authorized".to_string(),
        })]
    );
}

#[tokio::test]
async fn test_reconnect_with_new_settings() {
    let mut h = Harness::with_three_attempts();
    h.client.subscribe("sensor/dht22", QoS::AtMostOnce).await.unwrap();
    h.client.connect(broker()).await.unwrap();
    h.connack().await;

    let mut moved = broker();
    moved.host = "test.mosquitto.org".to_string();
    h.client.reconnect_with(moved.clone()).await.unwrap();
    assert_eq!(h.client.state(), &ConnectionState::Connecting);
    assert_eq!(h.client.status().config, Some(moved));

    h.connack().await;
    assert!(h.client.is_connected());
    assert_eq!(h.transport.subscribe_count("sensor/dht22").await, 2);

    let hosts: Vec<String> = h
        .transport
        .calls()
        .await
        .into_iter()
        .filter_map(|call| match call {
            TransportCall::Connect { host, .. } => Some(host),
            _ => None,
        })
        .collect();
    assert_eq!(hosts, vec!["broker.local", "test.mosquitto.org"]);
}

#[tokio::test]
async fn test_default_policy_backoff_sequence() {
    let mut h = Harness::new(ReconnectConfig::default());
    h.transport.set_connect_error(Some("connection refused")).await;

    h.client.connect(broker()).await.unwrap();
    for _ in 0..4 {
        h.fire_retry().await;
    }

    assert!(matches!(h.client.state(), ConnectionState::Failed(_)));
    assert_eq!(
        h.scheduler.scheduled_delays(),
        millis(&[1000, 2000, 4000, 8000])
    );
    assert_eq!(h.transport.connect_count().await, 5);
}

#[tokio::test]
async fn test_status_snapshot() {
    let mut h = Harness::with_three_attempts();
    h.client.subscribe("sensor/dht22", QoS::AtMostOnce).await.unwrap();

    let status = h.client.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(!status.is_connected);
    assert!(status.config.is_none());
    assert_eq!(status.subscriptions.len(), 1);

    h.client.connect(broker()).await.unwrap();
    h.connack().await;
    let status = h.client.status();
    assert!(status.is_connected);
    assert!(status.connected_since.is_some());
    assert_eq!(status.reconnect_count, 0);
}
