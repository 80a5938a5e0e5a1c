//! Session Tests (live-client)
//!
//! Tests for the receiver session against a scripted broker:
//! - Topic addressing and the attendance envelope
//! - Start, first-connect handling and fast-fail startup
//! - Rejoin on reconnect without duplicate delivery
//! - Heartbeat cadence, skipping and failure handling
//! - Outbound publishing and notifications
//! - Stop, including stop racing a pending start or an in-flight rejoin

use live_client::{
    ClientError, ConnectionError, ConnectionState, DisconnectReason, LogLevel, Session,
    SessionBuilder, SessionEvent,
};
use live_core::Scope;
use live_test_utils::{
    wait_for, ConnectFailure, EventCollector, MockBroker, MockTransport, DEFAULT_TIMEOUT,
};
use live_transport::{QoS, TransportError};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SENDER: &str = "stream/room1/sender";
const BROADCAST: &str = "stream/room1/receiver";
const UNICAST: &str = "stream/room1/receiver/c1";

fn builder() -> SessionBuilder {
    SessionBuilder::new("10.0.0.2:8883", "room1")
        .client_id("c1")
        .name("Alice")
        .image("https://img.example/alice.png")
        .credentials("app", "secret")
}

fn session(broker: &Arc<MockBroker>) -> Session<MockTransport> {
    builder()
        .build_with(broker.transport())
        .expect("Build failed")
}

fn count(events: &EventCollector<SessionEvent>, name: &str) -> usize {
    events.matching(|e| e.name() == name).len()
}

// ============================================================================
// Addressing
// ============================================================================

#[tokio::test]
async fn test_topics_for_channel_and_client() {
    let broker = MockBroker::new();
    let session = session(&broker);

    assert_eq!(session.topics().sender(), SENDER);
    assert_eq!(session.topics().broadcast(), BROADCAST);
    assert_eq!(session.topics().unicast(), UNICAST);
    assert_eq!(session.state(), ConnectionState::Idle);
    assert!(!session.is_connected());
}

// ============================================================================
// Start
// ============================================================================

#[tokio::test]
async fn test_start_subscribes_and_announces_begin() {
    let broker = MockBroker::new();
    let session = session(&broker);

    session.start().await.expect("Start failed");

    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(session.is_connected());
    assert_eq!(broker.subscriptions(), vec![BROADCAST, UNICAST]);

    let begin = broker.attendance("begin");
    assert_eq!(begin.len(), 1);
    assert_eq!(begin[0].topic, SENDER);
    assert_eq!(begin[0].qos, QoS::ExactlyOnce);
    assert!(!begin[0].retain);
    assert_eq!(
        begin[0].json(),
        json!({
            "id": "live-sender",
            "event": "attendance",
            "data": {
                "client": "c1",
                "event": "begin",
                "data": {"name": "Alice", "image": "https://img.example/alice.png"}
            }
        })
    );

    session.stop().await;
}

#[tokio::test]
async fn test_start_registers_end_as_last_will() {
    let broker = MockBroker::new();
    let session = session(&broker);

    session.start().await.expect("Start failed");

    let connects = broker.connects();
    assert_eq!(connects.len(), 1);
    let options = &connects[0];
    assert_eq!(options.client_id, "c1");
    assert_eq!(options.broker.username.as_deref(), Some("app"));
    assert_eq!(options.reconnect_period, Some(Duration::from_secs(1)));
    assert_eq!(options.connect_timeout, Duration::from_secs(20));
    assert!(!options.verify_certificates);

    let will = options.last_will.as_ref().expect("No last will");
    assert_eq!(will.topic, SENDER);
    assert_eq!(will.qos, QoS::ExactlyOnce);
    let payload: serde_json::Value = serde_json::from_slice(&will.payload).unwrap();
    assert_eq!(
        payload,
        json!({
            "id": "live-sender",
            "event": "attendance",
            "data": {"client": "c1", "event": "end"}
        })
    );

    broker.drop_connection();
    assert_eq!(broker.wills_fired().len(), 1);
    assert_eq!(broker.wills_fired()[0].topic, SENDER);

    session.stop().await;
}

#[tokio::test]
async fn test_start_twice_fails() {
    let broker = MockBroker::new();
    let session = session(&broker);

    session.start().await.expect("Start failed");
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, ClientError::AlreadyStarted));
    assert_eq!(broker.connects().len(), 1);

    session.stop().await;
    let err = session.start().await.unwrap_err();
    assert!(matches!(err, ClientError::Stopped));
}

#[tokio::test]
async fn test_start_fails_fast_when_refused() {
    let broker = MockBroker::new();
    broker.fail_connect(ConnectFailure::Refused);
    let session = session(&broker);

    let err = session.start().await.unwrap_err();

    match err {
        ClientError::Connection(ConnectionError::ConnectionRefused { address, port }) => {
            assert_eq!(address, "10.0.0.2");
            assert_eq!(port, 8883);
        }
        other => panic!("expected refused, got {:?}", other),
    }
    assert_eq!(session.state(), ConnectionState::Stopped);
    assert_eq!(broker.connects().len(), 1);
    assert_eq!(broker.open_connections(), 0);
    assert!(broker.publishes().is_empty());
}

#[tokio::test]
async fn test_start_fails_on_dns_error() {
    let broker = MockBroker::new();
    broker.fail_connect(ConnectFailure::DnsNotFound);
    let session = session(&broker);

    let err = session.start().await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::Connection(ConnectionError::DnsNotFound { .. })
    ));
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_start_fails_when_subscribe_fails() {
    let broker = MockBroker::new();
    broker.fail_subscribe(true);
    let session = session(&broker);

    let err = session.start().await.unwrap_err();

    assert!(matches!(err, ClientError::Subscribe(_)));
    assert_eq!(session.state(), ConnectionState::Stopped);
    assert_eq!(broker.open_connections(), 0);
    assert!(broker.attendance("begin").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_times_out() {
    let broker = MockBroker::new();
    broker.hold_connack();
    let session = builder()
        .connect_timeout(Duration::from_secs(2))
        .build_with(broker.transport())
        .unwrap();

    let err = session.start().await.unwrap_err();

    assert!(matches!(
        err,
        ClientError::Connection(ConnectionError::Other { .. })
    ));
    assert_eq!(session.state(), ConnectionState::Stopped);
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_stop_during_pending_start() {
    let broker = MockBroker::new();
    broker.hold_connack();
    let session = Arc::new(session(&broker));

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.start().await })
    };

    assert!(wait_for(|| broker.connects().len() == 1, DEFAULT_TIMEOUT).await);
    session.stop().await;

    let result = pending.await.expect("Start task panicked");
    assert!(matches!(result, Err(ClientError::Stopped)));
    assert_eq!(session.state(), ConnectionState::Stopped);
    assert_eq!(broker.open_connections(), 0);
    assert!(broker.subscriptions().is_empty());
    assert!(broker.publishes().is_empty());

    // A late connack on the torn-down link changes nothing
    broker.accept();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(broker.publishes().is_empty());
}

#[tokio::test]
async fn test_stop_after_begin_in_start_still_announces_end() {
    let broker = MockBroker::new();
    broker.delay_publish(Duration::from_millis(200));
    let session = Arc::new(session(&broker));

    let pending = {
        let session = session.clone();
        tokio::spawn(async move { session.start().await })
    };

    // Both subscriptions are in, so `begin` is on its way
    assert!(wait_for(|| broker.subscriptions().len() == 2, DEFAULT_TIMEOUT).await);
    session.stop().await;

    let result = pending.await.expect("Start task panicked");
    assert!(matches!(result, Err(ClientError::Stopped)));
    assert_eq!(session.state(), ConnectionState::Stopped);

    assert_eq!(broker.attendance("begin").len(), 1);
    assert_eq!(broker.attendance("end").len(), 1);
    assert!(broker.wills_fired().is_empty());
    assert_eq!(broker.open_connections(), 0);
}

// ============================================================================
// Reconnect
// ============================================================================

#[tokio::test]
async fn test_reconnects_rejoin_without_duplicate_delivery() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let events = EventCollector::spawn(session.events());

    session.start().await.expect("Start failed");

    for round in 1..=2 {
        broker.drop_connection();
        assert!(
            events
                .wait_for(round, |e| matches!(e, SessionEvent::Reconnect), DEFAULT_TIMEOUT)
                .await
        );
        assert_eq!(session.state(), ConnectionState::Reconnecting);

        broker.reconnect();
        assert!(wait_for(|| broker.attendance("begin").len() == round + 1, DEFAULT_TIMEOUT).await);
        assert!(wait_for(|| session.state() == ConnectionState::Connected, DEFAULT_TIMEOUT).await);
    }

    assert_eq!(broker.attendance("begin").len(), 3);
    assert_eq!(broker.subscription_count(BROADCAST), 3);
    assert_eq!(broker.subscription_count(UNICAST), 3);
    assert_eq!(broker.connects().len(), 1);

    broker.deliver(BROADCAST, r#"{"cmd":"play"}"#);
    assert!(
        events
            .wait_for(1, |e| matches!(e, SessionEvent::Message(_)), DEFAULT_TIMEOUT)
            .await
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count(&events, "message"), 1);

    session.stop().await;
}

#[tokio::test]
async fn test_disconnect_reasons() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let events = EventCollector::spawn(session.events());

    session.start().await.expect("Start failed");

    broker.drop_connection();
    assert!(
        events
            .wait_for(
                1,
                |e| *e == SessionEvent::Disconnect { reason: DisconnectReason::Close },
                DEFAULT_TIMEOUT
            )
            .await
    );
    // The connection error after the drop is reported, not fatal
    assert!(events.wait_for(1, |e| e.name() == "error", DEFAULT_TIMEOUT).await);

    broker.reconnect();
    assert!(wait_for(|| session.state() == ConnectionState::Connected, DEFAULT_TIMEOUT).await);

    broker.broker_disconnect();
    assert!(
        events
            .wait_for(
                1,
                |e| *e == SessionEvent::Disconnect { reason: DisconnectReason::Disconnect },
                DEFAULT_TIMEOUT
            )
            .await
    );

    session.stop().await;
}

#[tokio::test]
async fn test_resubscribe_failure_is_reported() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let events = EventCollector::spawn(session.events());

    session.start().await.expect("Start failed");

    broker.drop_connection();
    broker.fail_subscribe(true);
    broker.reconnect();

    assert!(
        events
            .wait_for(
                2,
                |e| matches!(e, SessionEvent::Error(m) if m.contains("resubscribe")),
                DEFAULT_TIMEOUT
            )
            .await
    );
    assert!(wait_for(|| broker.attendance("begin").len() == 2, DEFAULT_TIMEOUT).await);
    assert!(session.state().is_live());

    session.stop().await;
}

#[tokio::test]
async fn test_transport_error_is_reported_not_fatal() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let events = EventCollector::spawn(session.events());

    session.start().await.expect("Start failed");

    broker.inject_error(TransportError::ConnectionFailed("keep alive timeout".to_string()));
    assert!(
        events
            .wait_for(
                1,
                |e| matches!(e, SessionEvent::Error(m) if m.contains("keep alive timeout")),
                DEFAULT_TIMEOUT
            )
            .await
    );
    assert_eq!(session.state(), ConnectionState::Reconnecting);

    broker.reconnect();
    assert!(wait_for(|| session.state() == ConnectionState::Connected, DEFAULT_TIMEOUT).await);
    assert!(wait_for(|| broker.attendance("begin").len() == 2, DEFAULT_TIMEOUT).await);

    session.stop().await;
}

// ============================================================================
// Inbound
// ============================================================================

#[tokio::test]
async fn test_inbound_messages_by_scope() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let events = EventCollector::spawn(session.events());

    session.start().await.expect("Start failed");

    broker.deliver(BROADCAST, r#"{"cmd":"play"}"#);
    broker.deliver(UNICAST, r#"{"cmd":"mute","level":3}"#);

    assert!(
        events
            .wait_for(2, |e| matches!(e, SessionEvent::Message(_)), DEFAULT_TIMEOUT)
            .await
    );

    let messages: Vec<_> = events
        .values()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::Message(m) => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(messages[0].scope, Scope::Broadcast);
    assert_eq!(messages[0].payload, json!({"cmd": "play"}));
    assert_eq!(messages[1].scope, Scope::Unicast);
    assert_eq!(messages[1].payload["level"], 3);

    session.stop().await;
}

#[tokio::test]
async fn test_invalid_json_is_dropped() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let events = EventCollector::spawn(session.events());

    session.start().await.expect("Start failed");

    broker.deliver(BROADCAST, "not json");
    broker.deliver(UNICAST, vec![0xffu8, 0xfe]);

    assert!(events.wait_for(2, |e| e.name() == "error", DEFAULT_TIMEOUT).await);
    assert_eq!(count(&events, "message"), 0);
    assert_eq!(session.state(), ConnectionState::Connected);

    session.stop().await;
}

#[tokio::test]
async fn test_unknown_topic_is_dropped() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let events = EventCollector::spawn(session.events());

    session.start().await.expect("Start failed");

    broker.deliver("stream/room2/receiver", r#"{"cmd":"play"}"#);
    broker.deliver("stream/room1/receiver/c2", r#"{"cmd":"play"}"#);

    assert!(events.wait_for(2, |e| e.name() == "error", DEFAULT_TIMEOUT).await);
    assert_eq!(count(&events, "message"), 0);

    session.stop().await;
}

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test]
async fn test_heartbeat_refreshes_and_skips_while_disconnected() {
    let broker = MockBroker::new();
    let session = builder()
        .heartbeat_interval(Duration::from_millis(40))
        .build_with(broker.transport())
        .unwrap();

    session.start().await.expect("Start failed");

    assert!(wait_for(|| broker.attendance("refresh").len() >= 2, DEFAULT_TIMEOUT).await);
    let refresh = &broker.attendance("refresh")[0];
    assert_eq!(refresh.topic, SENDER);
    assert_eq!(refresh.qos, QoS::ExactlyOnce);
    assert_eq!(
        refresh.json(),
        json!({
            "id": "live-sender",
            "event": "attendance",
            "data": {"client": "c1", "event": "refresh"}
        })
    );

    broker.drop_connection();
    assert!(wait_for(|| session.state() == ConnectionState::Reconnecting, DEFAULT_TIMEOUT).await);
    let skipped = broker.attendance("refresh").len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(broker.attendance("refresh").len(), skipped);

    broker.reconnect();
    assert!(wait_for(|| broker.attendance("refresh").len() > skipped, DEFAULT_TIMEOUT).await);

    session.stop().await;
    let stopped = broker.attendance("refresh").len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(broker.attendance("refresh").len(), stopped);
}

#[tokio::test]
async fn test_heartbeat_failures_are_swallowed() {
    let logs = Arc::new(Mutex::new(Vec::new()));
    let sink = logs.clone();

    let broker = MockBroker::new();
    let session = builder()
        .heartbeat_interval(Duration::from_millis(30))
        .log(move |level, message| sink.lock().push((level, message.to_string())))
        .build_with(broker.transport())
        .unwrap();
    let events = EventCollector::spawn(session.events());

    session.start().await.expect("Start failed");
    broker.fail_publish(true);

    let failures = || {
        logs.lock()
            .iter()
            .filter(|(level, m)| *level == LogLevel::Error && m.contains("refresh failed"))
            .count()
    };
    assert!(wait_for(|| failures() >= 3, DEFAULT_TIMEOUT).await);

    assert_eq!(count(&events, "error"), 0);
    assert_eq!(session.state(), ConnectionState::Connected);

    session.stop().await;
}

// ============================================================================
// Send
// ============================================================================

#[tokio::test]
async fn test_send_requires_connection() {
    let broker = MockBroker::new();
    let session = session(&broker);

    let err = session.send(&json!({"hello": 1})).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
    assert!(broker.publishes().is_empty());

    session.start().await.expect("Start failed");
    session.stop().await;
    let published = broker.publishes().len();

    let err = session.send(&json!({"hello": 2})).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
    assert_eq!(broker.publishes().len(), published);
}

#[tokio::test]
async fn test_send_notifications() {
    let broker = MockBroker::new();
    let session = session(&broker);

    session.start().await.expect("Start failed");
    let events = EventCollector::spawn(session.events());

    session
        .send(&json!({"type": "ack", "seq": 7}))
        .await
        .expect("Send failed");

    let sent = broker.publishes_to(SENDER);
    let last = sent.last().unwrap();
    assert_eq!(last.qos, QoS::ExactlyOnce);
    assert_eq!(last.json(), json!({"type": "ack", "seq": 7}));

    assert!(events.wait_for(1, |e| e.name() == "send:success", DEFAULT_TIMEOUT).await);
    let names: Vec<_> = events.values().iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["sent", "send:success"]);
    match &events.values()[0] {
        SessionEvent::Sent(text) => {
            let value: serde_json::Value = serde_json::from_str(text).unwrap();
            assert_eq!(value, json!({"type": "ack", "seq": 7}));
        }
        other => panic!("expected sent, got {:?}", other),
    }

    events.clear();
    broker.fail_publish(true);
    let err = session.send(&json!({"type": "ack"})).await.unwrap_err();
    assert!(matches!(err, ClientError::Publish(_)));
    assert!(events.wait_for(1, |e| e.name() == "send:error", DEFAULT_TIMEOUT).await);
    let names: Vec<_> = events.values().iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["sent", "send:error"]);

    session.stop().await;
}

#[tokio::test]
async fn test_send_while_reconnecting_is_attempted() {
    let broker = MockBroker::new();
    let session = session(&broker);

    session.start().await.expect("Start failed");
    broker.drop_connection();
    assert!(wait_for(|| session.state() == ConnectionState::Reconnecting, DEFAULT_TIMEOUT).await);

    session
        .send(&json!({"queued": true}))
        .await
        .expect("Send failed");
    assert_eq!(broker.publishes_to(SENDER).last().unwrap().json()["queued"], true);

    session.stop().await;
}

#[tokio::test]
async fn test_concurrent_sends() {
    let broker = MockBroker::new();
    let session = session(&broker);

    session.start().await.expect("Start failed");
    let before = broker.publishes().len();

    let (m1, m2, m3) = (json!({"n": 1}), json!({"n": 2}), json!({"n": 3}));
    let (a, b, c) = tokio::join!(session.send(&m1), session.send(&m2), session.send(&m3),);
    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(broker.publishes().len(), before + 3);

    session.stop().await;
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test]
async fn test_stop_never_started_is_noop() {
    let broker = MockBroker::new();
    let session = session(&broker);

    session.stop().await;
    session.stop().await;

    assert_eq!(session.state(), ConnectionState::Idle);
    assert!(broker.connects().is_empty());
}

#[tokio::test]
async fn test_stop_announces_end_and_closes() {
    let broker = MockBroker::new();
    let session = session(&broker);

    session.start().await.expect("Start failed");
    session.stop().await;

    let end = broker.attendance("end");
    assert_eq!(end.len(), 1);
    assert_eq!(end[0].topic, SENDER);
    assert_eq!(end[0].qos, QoS::ExactlyOnce);
    assert_eq!(session.state(), ConnectionState::Stopped);
    assert_eq!(broker.open_connections(), 0);
    assert!(broker.wills_fired().is_empty());

    session.stop().await;
    assert_eq!(broker.attendance("end").len(), 1);
}

#[tokio::test]
async fn test_stop_completes_when_end_publish_fails() {
    let broker = MockBroker::new();
    let session = session(&broker);

    session.start().await.expect("Start failed");
    broker.fail_publish(true);
    session.stop().await;

    assert_eq!(session.state(), ConnectionState::Stopped);
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_stop_while_reconnecting_skips_end() {
    let broker = MockBroker::new();
    let session = session(&broker);

    session.start().await.expect("Start failed");
    broker.drop_connection();
    assert!(wait_for(|| session.state() == ConnectionState::Reconnecting, DEFAULT_TIMEOUT).await);

    session.stop().await;

    assert!(broker.attendance("end").is_empty());
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_stop_cancels_rejoin_in_flight() {
    let broker = MockBroker::new();
    let session = session(&broker);

    session.start().await.expect("Start failed");
    broker.drop_connection();
    assert!(wait_for(|| session.state() == ConnectionState::Reconnecting, DEFAULT_TIMEOUT).await);

    // The rejoin resubscribes, then holds its `begin` while stop runs
    broker.delay_publish(Duration::from_millis(200));
    broker.reconnect();
    assert!(wait_for(|| broker.subscription_count(UNICAST) == 2, DEFAULT_TIMEOUT).await);

    session.stop().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let tags: Vec<_> = broker
        .publishes_to(SENDER)
        .iter()
        .map(|p| p.json()["data"]["event"].clone())
        .collect();
    assert_eq!(tags, vec![json!("begin"), json!("end")]);
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_events_after_stop_are_ignored() {
    let broker = MockBroker::new();
    let session = session(&broker);
    let events = EventCollector::spawn(session.events());

    session.start().await.expect("Start failed");
    session.stop().await;

    broker.deliver(BROADCAST, r#"{"cmd":"play"}"#);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count(&events, "message"), 0);
}

// ============================================================================
// Preauth and logging
// ============================================================================

#[tokio::test]
async fn test_session_preauth_leaves_state_untouched() {
    let broker = MockBroker::new();
    let session = session(&broker);

    session.preauth().await.expect("Preauth failed");

    assert_eq!(session.state(), ConnectionState::Idle);
    assert_eq!(broker.open_connections(), 0);
    assert!(broker.connects()[0].last_will.is_none());

    session.start().await.expect("Start failed");
    assert_eq!(broker.connects().len(), 2);
    session.stop().await;
}

#[tokio::test]
async fn test_log_callback_never_sees_password() {
    let logs = Arc::new(Mutex::new(Vec::new()));
    let sink = logs.clone();

    let broker = MockBroker::new();
    let session = builder()
        .log(move |level, message| sink.lock().push((level, message.to_string())))
        .build_with(broker.transport())
        .unwrap();

    session.start().await.expect("Start failed");
    session.stop().await;

    let logs = logs.lock();
    assert!(logs
        .iter()
        .any(|(level, m)| *level == LogLevel::Info && m.contains("Connecting to")));
    assert!(logs.iter().all(|(_, m)| !m.contains("secret")));
}

#[tokio::test]
async fn test_independent_sessions() {
    let broker = MockBroker::new();
    let a = session(&broker);
    let b = builder()
        .client_id("c2")
        .build_with(broker.transport())
        .unwrap();

    a.start().await.expect("Start failed");
    b.start().await.expect("Start failed");
    a.stop().await;

    assert_eq!(a.state(), ConnectionState::Stopped);
    assert_eq!(b.state(), ConnectionState::Connected);
    assert_eq!(broker.subscription_count("stream/room1/receiver/c2"), 1);
    assert_eq!(broker.open_connections(), 1);

    b.stop().await;
}
