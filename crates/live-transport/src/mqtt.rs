//! MQTT transport
//!
//! MQTT 3.1.1 over TCP or TLS via rumqttc. The rumqttc event loop runs in
//! a spawned task that translates packets into [`TransportEvent`]s and
//! owns the reconnect policy: a fixed delay between attempts, no backoff
//! growth and no attempt cap.
//!
//! Publishes resolve once the broker has acknowledged them (PUBACK at
//! QoS 1, PUBCOMP at QoS 2) and subscribes once the SUBACK arrives, so a
//! caller that awaits a publish before closing knows the handshake is done.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, NetworkOptions, Outgoing, Packet,
    QoS as MqttQoS, SubAck, SubscribeReasonCode, TlsConfiguration, Transport as MqttWire,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::options::{ConnectOptions, QoS};
use crate::tls;
use crate::traits::{PubSubReceiver, PubSubSender, PubSubTransport, TransportEvent};

/// Default capacity of the rumqttc request channel
const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Largest packet accepted or sent, in bytes
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

/// How long `close()` waits for in-flight acknowledgements, and then again
/// for the DISCONNECT to be flushed
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// MQTT transport backed by rumqttc
#[derive(Debug, Clone)]
pub struct MqttTransport {
    capacity: usize,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Set the request channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

/// Translate connect options into rumqttc options
fn mqtt_options(options: &ConnectOptions) -> Result<MqttOptions> {
    let broker = &options.broker;

    // rumqttc panics on sub-second keep alives
    if !options.keep_alive.is_zero() && options.keep_alive < Duration::from_secs(1) {
        return Err(TransportError::Other(format!(
            "keep alive must be zero or at least 1s, got {}ms",
            options.keep_alive.as_millis()
        )));
    }

    let mut mqtt = MqttOptions::new(&options.client_id, &broker.host, broker.port);
    mqtt.set_keep_alive(options.keep_alive);
    mqtt.set_clean_session(options.clean_session);
    mqtt.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    if let Some(username) = &broker.username {
        mqtt.set_credentials(username, broker.password.as_deref().unwrap_or(""));
    }

    if let Some(will) = &options.last_will {
        mqtt.set_last_will(rumqttc::LastWill::new(
            &will.topic,
            will.payload.to_vec(),
            mqtt_qos(will.qos),
            will.retain,
        ));
    }

    if broker.scheme.is_tls() {
        let config = tls::client_config(options.verify_certificates)?;
        mqtt.set_transport(MqttWire::tls_with_config(TlsConfiguration::Rustls(config)));
    }

    Ok(mqtt)
}

/// Map a rumqttc connection error onto the transport taxonomy
fn classify(error: &ConnectionError, host: &str, port: u16) -> TransportError {
    match error {
        ConnectionError::Io(e) => TransportError::from_connect_io(e, host, port),
        ConnectionError::Tls(e) => TransportError::Tls(e.to_string()),
        ConnectionError::NetworkTimeout => TransportError::Timeout,
        ConnectionError::ConnectionRefused(code) => {
            TransportError::ConnectionFailed(format!("broker refused connection: {:?}", code))
        }
        other => TransportError::ConnectionFailed(other.to_string()),
    }
}

type Completion = oneshot::Sender<Result<()>>;

/// Callers waiting on broker acknowledgements
///
/// rumqttc hands out packet ids when it dequeues a request and reports
/// them through `Outgoing` events in request order, so a waiter sits in a
/// FIFO until its id is known and in a map keyed by id after that.
#[derive(Default)]
struct Waiters {
    queued_publishes: VecDeque<Completion>,
    queued_subscribes: VecDeque<(String, Completion)>,
    publishes: HashMap<u16, Completion>,
    subscribes: HashMap<u16, (String, Completion)>,
    closed: bool,
}

impl Waiters {
    fn len(&self) -> usize {
        self.queued_publishes.len()
            + self.queued_subscribes.len()
            + self.publishes.len()
            + self.subscribes.len()
    }
}

struct Acks {
    waiters: Mutex<Waiters>,
    outstanding: watch::Sender<usize>,
}

impl Acks {
    fn new() -> Self {
        Self {
            waiters: Mutex::new(Waiters::default()),
            outstanding: watch::channel(0).0,
        }
    }

    fn update(&self, waiters: &Waiters) {
        self.outstanding.send_replace(waiters.len());
    }

    fn publish_sent(&self, pkid: u16) {
        let mut waiters = self.waiters.lock();
        // Retransmitted after a reconnect, already tracked
        if pkid != 0 && waiters.publishes.contains_key(&pkid) {
            return;
        }
        if let Some(done) = waiters.queued_publishes.pop_front() {
            if pkid == 0 {
                let _ = done.send(Ok(()));
            } else {
                waiters.publishes.insert(pkid, done);
            }
        }
        self.update(&waiters);
    }

    fn publish_acked(&self, pkid: u16) {
        let mut waiters = self.waiters.lock();
        if let Some(done) = waiters.publishes.remove(&pkid) {
            let _ = done.send(Ok(()));
        }
        self.update(&waiters);
    }

    fn subscribe_sent(&self, pkid: u16) {
        let mut waiters = self.waiters.lock();
        if let Some(waiter) = waiters.queued_subscribes.pop_front() {
            waiters.subscribes.insert(pkid, waiter);
        }
        self.update(&waiters);
    }

    fn subscribe_acked(&self, ack: &SubAck) {
        let mut waiters = self.waiters.lock();
        if let Some((topic, done)) = waiters.subscribes.remove(&ack.pkid) {
            let rejected = ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure));
            let result = if rejected {
                warn!("MQTT broker rejected subscription to {}", topic);
                Err(TransportError::SubscribeFailed(format!(
                    "broker rejected subscription to {}",
                    topic
                )))
            } else {
                debug!("MQTT subscribed to: {}", topic);
                Ok(())
            };
            let _ = done.send(result);
        }
        self.update(&waiters);
    }

    /// Subscribes are not replayed after a reconnect, so their SUBACK never
    /// comes. Unacknowledged publishes are retransmitted and stay tracked.
    fn connection_lost(&self) {
        let mut waiters = self.waiters.lock();
        for (_, (_, done)) in waiters.subscribes.drain() {
            let _ = done.send(Err(TransportError::ConnectionClosed));
        }
        self.update(&waiters);
    }

    fn close_all(&self) {
        let mut waiters = self.waiters.lock();
        waiters.closed = true;
        for done in waiters.queued_publishes.drain(..) {
            let _ = done.send(Err(TransportError::ConnectionClosed));
        }
        for (_, done) in waiters.queued_subscribes.drain(..) {
            let _ = done.send(Err(TransportError::ConnectionClosed));
        }
        for (_, done) in waiters.publishes.drain() {
            let _ = done.send(Err(TransportError::ConnectionClosed));
        }
        for (_, (_, done)) in waiters.subscribes.drain() {
            let _ = done.send(Err(TransportError::ConnectionClosed));
        }
        self.update(&waiters);
    }

    /// Resolves once nothing is waiting on the broker
    async fn drained(&self) {
        let mut outstanding = self.outstanding.subscribe();
        let _ = outstanding.wait_for(|count| *count == 0).await;
    }
}

#[async_trait]
impl PubSubTransport for MqttTransport {
    type Sender = MqttSender;
    type Receiver = MqttReceiver;

    async fn connect(&self, options: &ConnectOptions) -> Result<(Self::Sender, Self::Receiver)> {
        let mqtt = mqtt_options(options)?;
        let (client, mut eventloop) = AsyncClient::new(mqtt, self.capacity);

        let mut network = NetworkOptions::new();
        network.set_connection_timeout(options.connect_timeout.as_secs().max(1));
        eventloop.set_network_options(network);

        // Unbounded so the loop keeps reading acknowledgements while the
        // consumer is busy awaiting one of them
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));
        let acks = Arc::new(Acks::new());

        info!("Connecting to MQTT broker {}", options.broker);

        let driver = Driver {
            events: event_tx,
            connected: connected.clone(),
            acks: acks.clone(),
            reconnect_period: options.reconnect_period,
            host: options.broker.host.clone(),
            port: options.broker.port,
        };
        let task = tokio::spawn(driver.run(eventloop, shutdown_rx));

        let sender = MqttSender {
            client,
            connected,
            acks,
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
        };

        Ok((sender, MqttReceiver { rx: event_rx }))
    }
}

/// Owns the rumqttc event loop on its task
struct Driver {
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
    acks: Arc<Acks>,
    reconnect_period: Option<Duration>,
    host: String,
    port: u16,
}

impl Driver {
    /// Poll the event loop until shutdown, a graceful disconnect, or the
    /// first failure when reconnect is disabled
    async fn run(self, mut eventloop: EventLoop, mut shutdown: watch::Receiver<bool>) {
        loop {
            let polled = tokio::select! {
                _ = shutdown.changed() => break,
                polled = eventloop.poll() => polled,
            };

            let event = match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    debug!("MQTT connack: {:?}", ack.code);
                    self.connected.store(true, Ordering::SeqCst);
                    TransportEvent::Connected
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(
                        "MQTT received: {} ({} bytes)",
                        publish.topic,
                        publish.payload.len()
                    );
                    TransportEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload,
                    }
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    self.acks.publish_acked(ack.pkid);
                    continue;
                }
                Ok(Event::Incoming(Packet::PubComp(comp))) => {
                    self.acks.publish_acked(comp.pkid);
                    continue;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    self.acks.subscribe_acked(&ack);
                    continue;
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    self.acks.publish_sent(pkid);
                    continue;
                }
                Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                    self.acks.subscribe_sent(pkid);
                    continue;
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    warn!("MQTT broker sent disconnect");
                    self.connected.store(false, Ordering::SeqCst);
                    TransportEvent::Disconnected
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    let _ = self.events.send(TransportEvent::Closed);
                    break;
                }
                Ok(_) => continue,
                Err(error) => {
                    self.acks.connection_lost();

                    if self.connected.swap(false, Ordering::SeqCst)
                        && self.events.send(TransportEvent::Closed).is_err()
                    {
                        break;
                    }

                    warn!("MQTT connection error: {}", error);
                    let classified = classify(&error, &self.host, self.port);
                    if self.events.send(TransportEvent::Error(classified)).is_err() {
                        break;
                    }

                    let Some(period) = self.reconnect_period else {
                        break;
                    };

                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(period) => {}
                    }

                    TransportEvent::Reconnecting
                }
            };

            if self.events.send(event).is_err() {
                break;
            }
        }

        // Drop the request channel first so no new request can slip in
        // behind the final sweep
        drop(eventloop);
        self.acks.close_all();
        self.connected.store(false, Ordering::SeqCst);
        debug!("MQTT event loop stopped");
    }
}

/// MQTT sender
pub struct MqttSender {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    acks: Arc<Acks>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSender {
    async fn completion(completed: oneshot::Receiver<Result<()>>) -> Result<()> {
        completed
            .await
            .map_err(|_| TransportError::ConnectionClosed)?
    }
}

#[async_trait]
impl PubSubSender for MqttSender {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<()> {
        let (done, completed) = oneshot::channel();
        {
            let mut waiters = self.acks.waiters.lock();
            if waiters.closed {
                return Err(TransportError::NotConnected);
            }
            self.client
                .try_subscribe(topic, mqtt_qos(qos))
                .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
            waiters.queued_subscribes.push_back((topic.to_string(), done));
            self.acks.update(&waiters);
        }

        Self::completion(completed).await
    }

    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<()> {
        let (done, completed) = oneshot::channel();
        {
            let mut waiters = self.acks.waiters.lock();
            if waiters.closed {
                return Err(TransportError::NotConnected);
            }
            self.client
                .try_publish(topic, mqtt_qos(qos), retain, payload.to_vec())
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
            waiters.queued_publishes.push_back(done);
            self.acks.update(&waiters);
        }

        Self::completion(completed).await?;
        debug!("MQTT sent to topic: {}", topic);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        let task = self.task.lock().take();
        let Some(mut task) = task else {
            return Ok(());
        };

        if self.is_connected() {
            // DISCONNECT must not overtake a QoS 1/2 handshake still in flight
            if tokio::time::timeout(CLOSE_GRACE, self.acks.drained())
                .await
                .is_err()
            {
                debug!("MQTT acknowledgements still pending at close");
            }

            if self.client.try_disconnect().is_ok()
                && tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_ok()
            {
                self.connected.store(false, Ordering::SeqCst);
                return Ok(());
            }
            debug!("MQTT disconnect not flushed in time, aborting event loop");
        }

        let _ = self.shutdown.send(true);
        task.abort();
        let _ = task.await;
        self.acks.close_all();
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MqttSender {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// MQTT receiver
pub struct MqttReceiver {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl PubSubReceiver for MqttReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}
