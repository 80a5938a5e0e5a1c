//! Common test helpers for live receiver tests
//!
//! This crate provides:
//! - A scripted in-memory broker ([`MockBroker`]) behind the transport traits
//! - A socket-level MQTT 3.1.1 broker ([`WireBroker`]) for the real transport
//! - Event collectors for broadcast channels ([`EventCollector`])
//! - Condition-based waiting (no hardcoded sleeps)

use async_trait::async_trait;
use bytes::Bytes;
use live_transport::{
    ConnectOptions, PubSubReceiver, PubSubSender, PubSubTransport, QoS, Result, TransportError,
    TransportEvent,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

mod wire;

pub use wire::{WireBroker, WirePacket};

/// Default test timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default condition check interval
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(5);

// ============================================================================
// Condition-Based Waiting
// ============================================================================

/// Wait for a condition with timeout - condition-based, not time-based
pub async fn wait_for<F>(check: F, max_wait: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < max_wait {
        if check() {
            return true;
        }
        tokio::time::sleep(DEFAULT_CHECK_INTERVAL).await;
    }
    check()
}

// ============================================================================
// Mock Broker
// ============================================================================

/// How a scripted connect attempt fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    Refused,
    DnsNotFound,
    Other(String),
    /// Never answer, leaving the attempt pending
    Silent,
}

impl ConnectFailure {
    fn to_error(&self, options: &ConnectOptions) -> Option<TransportError> {
        match self {
            ConnectFailure::Refused => Some(TransportError::ConnectionRefused {
                address: options.broker.host.clone(),
                port: options.broker.port,
            }),
            ConnectFailure::DnsNotFound => Some(TransportError::DnsNotFound {
                host: options.broker.host.clone(),
            }),
            ConnectFailure::Other(message) => {
                Some(TransportError::ConnectionFailed(message.clone()))
            }
            ConnectFailure::Silent => None,
        }
    }
}

/// A publish recorded by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,
}

impl Published {
    /// Payload parsed as JSON, `Null` if it is not JSON
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

struct Link {
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    connected: Arc<AtomicBool>,
    closed: bool,
    will: Option<Published>,
}

#[derive(Default)]
struct BrokerState {
    connects: Vec<ConnectOptions>,
    subscriptions: Vec<(String, QoS)>,
    publishes: Vec<Published>,
    wills_fired: Vec<Published>,
    links: Vec<Link>,
    connect_failure: Option<ConnectFailure>,
    hold_connack: bool,
    fail_subscribe: bool,
    fail_publish: bool,
    publish_delay: Option<Duration>,
}

/// Scripted in-memory broker.
///
/// Every `connect` opens a new link. The most recent link is the one the
/// scripting methods (`deliver`, `drop_connection`, `reconnect`, ...) act on.
#[derive(Default)]
pub struct MockBroker {
    state: Mutex<BrokerState>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport handle bound to this broker
    pub fn transport(self: &Arc<Self>) -> MockTransport {
        MockTransport {
            broker: self.clone(),
        }
    }

    // --- scripting -----------------------------------------------------

    /// Fail every following connect attempt
    pub fn fail_connect(&self, failure: ConnectFailure) {
        self.state.lock().connect_failure = Some(failure);
    }

    /// Do not acknowledge connects until [`MockBroker::accept`] is called
    pub fn hold_connack(&self) {
        self.state.lock().hold_connack = true;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.state.lock().fail_subscribe = fail;
    }

    pub fn fail_publish(&self, fail: bool) {
        self.state.lock().fail_publish = fail;
    }

    /// Delay every publish before it is recorded
    pub fn delay_publish(&self, delay: Duration) {
        self.state.lock().publish_delay = Some(delay);
    }

    /// Acknowledge the current pending connect
    pub fn accept(&self) {
        self.with_current(|link| {
            link.connected.store(true, Ordering::SeqCst);
            send(link, TransportEvent::Connected);
        });
    }

    /// Deliver a publish to the current link
    pub fn deliver(&self, topic: &str, payload: impl Into<Bytes>) {
        let payload = payload.into();
        self.with_current(|link| {
            send(
                link,
                TransportEvent::Message {
                    topic: topic.to_string(),
                    payload,
                },
            );
        });
    }

    /// Drop the network connection uncleanly; the last will fires and the
    /// client is told it is reconnecting
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        let mut fired = None;
        if let Some(link) = state.links.last_mut() {
            if link.connected.swap(false, Ordering::SeqCst) {
                fired = link.will.clone();
                send(link, TransportEvent::Closed);
            }
            send(
                link,
                TransportEvent::Error(TransportError::ConnectionFailed(
                    "connection reset by peer".to_string(),
                )),
            );
            send(link, TransportEvent::Reconnecting);
        }
        if let Some(will) = fired {
            state.wills_fired.push(will);
        }
    }

    /// Complete a reconnect on the current link
    pub fn reconnect(&self) {
        self.accept();
    }

    /// Send a broker DISCONNECT
    pub fn broker_disconnect(&self) {
        self.with_current(|link| {
            link.connected.store(false, Ordering::SeqCst);
            send(link, TransportEvent::Disconnected);
        });
    }

    /// Inject an arbitrary transport error
    pub fn inject_error(&self, error: TransportError) {
        self.with_current(|link| send(link, TransportEvent::Error(error)));
    }

    fn with_current<F: FnOnce(&mut Link)>(&self, f: F) {
        let mut state = self.state.lock();
        if let Some(link) = state.links.last_mut() {
            if !link.closed {
                f(link);
            }
        }
    }

    // --- inspection ----------------------------------------------------

    pub fn connects(&self) -> Vec<ConnectOptions> {
        self.state.lock().connects.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .map(|(topic, _)| topic.clone())
            .collect()
    }

    pub fn subscription_count(&self, topic: &str) -> usize {
        self.state
            .lock()
            .subscriptions
            .iter()
            .filter(|(t, _)| t == topic)
            .count()
    }

    pub fn publishes(&self) -> Vec<Published> {
        self.state.lock().publishes.clone()
    }

    pub fn publishes_to(&self, topic: &str) -> Vec<Published> {
        self.state
            .lock()
            .publishes
            .iter()
            .filter(|p| p.topic == topic)
            .cloned()
            .collect()
    }

    /// Attendance publishes with the given `data.event` tag
    pub fn attendance(&self, tag: &str) -> Vec<Published> {
        self.state
            .lock()
            .publishes
            .iter()
            .filter(|p| {
                let json = p.json();
                json["event"] == "attendance" && json["data"]["event"] == tag
            })
            .cloned()
            .collect()
    }

    pub fn wills_fired(&self) -> Vec<Published> {
        self.state.lock().wills_fired.clone()
    }

    /// Links that were opened and not closed
    pub fn open_connections(&self) -> usize {
        self.state.lock().links.iter().filter(|l| !l.closed).count()
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .links
            .last()
            .map(|l| !l.closed && l.connected.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

fn send(link: &Link, event: TransportEvent) {
    if let Some(events) = &link.events {
        let _ = events.send(event);
    }
}

/// Transport that connects to a [`MockBroker`]
#[derive(Clone)]
pub struct MockTransport {
    broker: Arc<MockBroker>,
}

#[async_trait]
impl PubSubTransport for MockTransport {
    type Sender = MockSender;
    type Receiver = MockReceiver;

    async fn connect(&self, options: &ConnectOptions) -> Result<(Self::Sender, Self::Receiver)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        let mut state = self.broker.state.lock();
        state.connects.push(options.clone());

        let will = options.last_will.as_ref().map(|w| Published {
            topic: w.topic.clone(),
            qos: w.qos,
            retain: w.retain,
            payload: w.payload.clone(),
        });

        let mut link = Link {
            events: Some(tx),
            connected: connected.clone(),
            closed: false,
            will,
        };

        match &state.connect_failure {
            Some(failure) => {
                if let Some(error) = failure.to_error(options) {
                    send(&link, TransportEvent::Error(error));
                    if options.reconnect_period.is_none() {
                        link.events = None;
                    } else {
                        send(&link, TransportEvent::Reconnecting);
                    }
                }
            }
            None if !state.hold_connack => {
                connected.store(true, Ordering::SeqCst);
                send(&link, TransportEvent::Connected);
            }
            None => {}
        }

        let index = state.links.len();
        state.links.push(link);

        Ok((
            MockSender {
                broker: self.broker.clone(),
                index,
                connected,
            },
            MockReceiver { rx },
        ))
    }
}

/// Sender half of a mock link
pub struct MockSender {
    broker: Arc<MockBroker>,
    index: usize,
    connected: Arc<AtomicBool>,
}

impl MockSender {
    fn is_closed(&self) -> bool {
        self.broker
            .state
            .lock()
            .links
            .get(self.index)
            .map(|l| l.closed)
            .unwrap_or(true)
    }
}

#[async_trait]
impl PubSubSender for MockSender {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        let mut state = self.broker.state.lock();
        if state.links.get(self.index).map(|l| l.closed).unwrap_or(true) {
            return Err(TransportError::NotConnected);
        }
        if state.fail_subscribe {
            return Err(TransportError::SubscribeFailed(format!(
                "not authorized: {}",
                topic
            )));
        }
        state.subscriptions.push((topic.to_string(), qos));
        Ok(())
    }

    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<()> {
        let delay = self.broker.state.lock().publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.is_closed() {
            return Err(TransportError::NotConnected);
        }

        let mut state = self.broker.state.lock();
        if state.fail_publish {
            return Err(TransportError::SendFailed("publish rejected".to_string()));
        }
        state.publishes.push(Published {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.broker.state.lock();
        if let Some(link) = state.links.get_mut(self.index) {
            link.closed = true;
            link.connected.store(false, Ordering::SeqCst);
            link.events = None;
        }
        Ok(())
    }
}

/// Receiver half of a mock link
pub struct MockReceiver {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl PubSubReceiver for MockReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

// ============================================================================
// Event Collector
// ============================================================================

/// Collects everything published on a broadcast channel
#[derive(Clone)]
pub struct EventCollector<T> {
    values: Arc<Mutex<Vec<T>>>,
    count: Arc<AtomicU32>,
}

impl<T: Clone + Send + 'static> EventCollector<T> {
    /// Spawn a task draining `rx` into the collector
    pub fn spawn(mut rx: broadcast::Receiver<T>) -> Self {
        let collector = Self {
            values: Arc::new(Mutex::new(Vec::new())),
            count: Arc::new(AtomicU32::new(0)),
        };

        let values = collector.values.clone();
        let count = collector.count.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(value) => {
                        values.lock().push(value);
                        count.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        collector
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn values(&self) -> Vec<T> {
        self.values.lock().clone()
    }

    /// Values matching a predicate
    pub fn matching<F: Fn(&T) -> bool>(&self, predicate: F) -> Vec<T> {
        self.values
            .lock()
            .iter()
            .filter(|v| predicate(v))
            .cloned()
            .collect()
    }

    /// Wait until at least `n` values match the predicate
    pub async fn wait_for<F>(&self, n: usize, predicate: F, max_wait: Duration) -> bool
    where
        F: Fn(&T) -> bool,
    {
        wait_for(
            || self.values.lock().iter().filter(|v| predicate(v)).count() >= n,
            max_wait,
        )
        .await
    }

    pub fn clear(&self) {
        self.values.lock().clear();
        self.count.store(0, Ordering::SeqCst);
    }
}
