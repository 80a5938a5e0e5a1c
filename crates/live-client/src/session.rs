//! Session manager
//!
//! A [`Session`] exclusively owns one transport connection and one
//! heartbeat timer and drives them through the connection state machine:
//!
//! - `start()` connects with a registered last will (an attendance `end`),
//!   and on the first connack subscribes both receiver topics, announces
//!   `begin`, arms the heartbeat and starts the event pump.
//! - Every later connack resubscribes and announces `begin` again.
//! - `stop()` cancels the heartbeat and pump, announces `end` and closes.
//!
//! Independent sessions are independent instances; nothing is shared.

use bytes::Bytes;
use live_core::{AttendanceEvent, InboundMessage, Participant, Topics};
use live_transport::{
    BrokerUrl, ConnectOptions, LastWill, PubSubReceiver, PubSubSender, PubSubTransport, QoS,
    TransportEvent,
};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{ClientError, ConnectionError, Result};
use crate::events::{DisconnectReason, Emitter, LogLevel, SessionEvent};
use crate::heartbeat;
use crate::preauth;
use crate::publisher::Publisher;
use crate::state::{ConnectKind, ConnectionState};

/// Upper bound on the attendance `end` publish during teardown
const DEPART_TIMEOUT: Duration = Duration::from_secs(5);

/// Timing and TLS settings fixed at construction
#[derive(Debug, Clone)]
pub(crate) struct SessionSettings {
    pub heartbeat_interval: Duration,
    pub reconnect_period: Duration,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    pub verify_certificates: bool,
}

#[derive(Default)]
struct Tasks {
    heartbeat: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(&mut self) {
        for task in [self.heartbeat.take(), self.pump.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

/// State reachable from the background tasks
struct Shared<S> {
    client_id: String,
    channel: String,
    participant: Participant,
    topics: Topics,
    state: RwLock<ConnectionState>,
    connection: RwLock<Option<Arc<S>>>,
    tasks: Mutex<Tasks>,
    stopping: watch::Sender<bool>,
    emitter: Emitter,
    publisher: Publisher,
}

/// A receiver session on one channel
pub struct Session<T: PubSubTransport> {
    transport: T,
    broker: BrokerUrl,
    settings: SessionSettings,
    /// Held by `start()` until it settles so `stop()` can wait it out
    lifecycle: tokio::sync::Mutex<()>,
    shared: Arc<Shared<T::Sender>>,
}

impl<T: PubSubTransport> Session<T> {
    pub(crate) fn new(
        transport: T,
        broker: BrokerUrl,
        client_id: String,
        channel: String,
        participant: Participant,
        settings: SessionSettings,
        emitter: Emitter,
    ) -> Result<Self> {
        let topics = Topics::new(&channel, &client_id)?;
        let publisher = Publisher::new(topics.sender(), emitter.clone());
        let (stopping, _) = watch::channel(false);

        Ok(Self {
            transport,
            broker,
            settings,
            lifecycle: tokio::sync::Mutex::new(()),
            shared: Arc::new(Shared {
                client_id,
                channel,
                participant,
                topics,
                state: RwLock::new(ConnectionState::Idle),
                connection: RwLock::new(None),
                tasks: Mutex::new(Tasks::default()),
                stopping,
                emitter,
                publisher,
            }),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    pub fn topics(&self) -> &Topics {
        &self.shared.topics
    }

    pub fn participant(&self) -> &Participant {
        &self.shared.participant
    }

    pub fn broker(&self) -> &BrokerUrl {
        &self.broker
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Whether the broker connection is currently established
    pub fn is_connected(&self) -> bool {
        self.shared
            .live_connection()
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    /// Subscribe to session notifications
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.emitter.subscribe()
    }

    fn base_options(&self) -> ConnectOptions {
        ConnectOptions::new(self.shared.client_id.as_str(), self.broker.clone())
            .connect_timeout(self.settings.connect_timeout)
            .keep_alive(self.settings.keep_alive)
            .verify_certificates(self.settings.verify_certificates)
    }

    /// One-shot connectivity check with this session's broker and identity.
    ///
    /// Leaves no connection open and does not touch the session state.
    pub async fn preauth(&self) -> Result<()> {
        preauth::check(&self.transport, self.base_options()).await
    }

    /// Connect, subscribe, and announce attendance.
    ///
    /// Settles once: `Ok` after the first connack has been fully handled,
    /// `Err` on the first connection error, timeout, subscribe failure, or
    /// a concurrent `stop()`. No retry happens while this call is pending.
    /// A failed start leaves the session `Stopped`.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut state = self.shared.state.write();
            match *state {
                ConnectionState::Idle => *state = ConnectionState::Connecting,
                ConnectionState::Stopped => return Err(ClientError::Stopped),
                _ => return Err(ClientError::AlreadyStarted),
            }
        }

        self.shared.emitter.log(
            LogLevel::Info,
            &format!(
                "Connecting to {} as {} on channel {}",
                self.broker, self.shared.client_id, self.shared.channel
            ),
        );

        let result = self.establish().await;
        match &result {
            Ok(()) => self.shared.emitter.log(LogLevel::Info, "Session started"),
            Err(e) => {
                *self.shared.state.write() = ConnectionState::Stopped;
                self.shared.stopping.send_replace(true);
                self.shared
                    .emitter
                    .log(LogLevel::Error, &format!("Session start failed: {}", e));
            }
        }

        result
    }

    async fn establish(&self) -> Result<()> {
        let end = AttendanceEvent::End
            .envelope(&self.shared.client_id)
            .to_json()?;
        let options = self
            .base_options()
            .reconnect_every(self.settings.reconnect_period)
            .last_will(LastWill::new(
                self.shared.topics.sender(),
                Bytes::from(end),
                QoS::STRONGEST,
            ));

        let (connection, mut receiver) = self.transport.connect(&options).await?;
        let connection = Arc::new(connection);

        let joined = self.join(connection.as_ref(), &mut receiver).await;
        let announced = joined.is_ok();
        let result = match joined {
            Ok(()) => {
                self.shared.announce(connection.as_ref()).await;
                self.shared.commit_first_connect(
                    connection.clone(),
                    receiver,
                    self.settings.heartbeat_interval,
                )
            }
            Err(e) => Err(e),
        };

        if result.is_err() {
            // A graceful close discards the last will, so a `begin` already
            // sent on this link needs its `end` here
            if announced {
                self.shared.depart(connection.as_ref()).await;
            }
            if let Err(e) = connection.close().await {
                debug!("Close after failed start: {}", e);
            }
        }

        result
    }

    /// Wait for the first connack and subscribe both inbound topics
    async fn join(&self, connection: &T::Sender, receiver: &mut T::Receiver) -> Result<()> {
        let mut stopping = self.shared.stopping.subscribe();
        let timeout = self.settings.connect_timeout;

        let connack = tokio::select! {
            biased;
            _ = stopping.wait_for(|stopped| *stopped) => return Err(ClientError::Stopped),
            connack = tokio::time::timeout(timeout, await_connack(receiver)) => connack,
        };
        connack.map_err(|_| ConnectionError::timed_out(timeout))??;

        for topic in self.shared.topics.inbound() {
            self.shared.ensure_connecting()?;
            connection
                .subscribe(topic, QoS::STRONGEST)
                .await
                .map_err(|e| ClientError::Subscribe(e.to_string()))?;
        }

        self.shared.ensure_connecting()
    }

    /// Publish an application message on the sender topic.
    ///
    /// Fails with [`ClientError::NotConnected`] without any I/O unless the
    /// session is `Connected` or `Reconnecting`.
    pub async fn send<M: Serialize + ?Sized>(&self, message: &M) -> Result<()> {
        let connection = self
            .shared
            .live_connection()
            .ok_or(ClientError::NotConnected)?;
        self.shared.publisher.publish(connection.as_ref(), message).await
    }

    /// Tear the session down.
    ///
    /// No-op on a session that is idle or already stopped. Otherwise waits
    /// for a pending `start()` to settle, cancels the heartbeat and the
    /// event pump, announces `end` (best effort) and closes the connection.
    pub async fn stop(&self) {
        let previous = {
            let mut state = self.shared.state.write();
            let previous = *state;
            if matches!(previous, ConnectionState::Idle | ConnectionState::Stopped) {
                return;
            }
            *state = ConnectionState::Stopped;
            previous
        };
        self.shared.stopping.send_replace(true);

        let _lifecycle = self.lifecycle.lock().await;

        // Nothing may touch the connection once teardown starts, including
        // a rejoin the pump is still running
        self.shared.tasks.lock().abort_all();

        let connection = self.shared.connection.write().take();
        if let Some(connection) = connection {
            self.shared.depart(connection.as_ref()).await;

            if let Err(e) = connection.close().await {
                self.shared
                    .emitter
                    .log(LogLevel::Debug, &format!("close failed: {}", e));
            }
        }

        self.shared.emitter.log(
            LogLevel::Info,
            &format!("Session stopped (was {})", previous),
        );
    }
}

impl<S: PubSubSender + 'static> Shared<S> {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn ensure_connecting(&self) -> Result<()> {
        if self.state() == ConnectionState::Connecting {
            Ok(())
        } else {
            Err(ClientError::Stopped)
        }
    }

    /// The owned connection, if the session is live
    fn live_connection(&self) -> Option<Arc<S>> {
        if !self.state().is_live() {
            return None;
        }
        self.connection.read().clone()
    }

    /// Take ownership of the connection and spawn the pump and heartbeat.
    ///
    /// Fails if `stop()` ran while the first connect was being handled.
    fn commit_first_connect<R>(
        self: &Arc<Self>,
        connection: Arc<S>,
        receiver: R,
        heartbeat_interval: Duration,
    ) -> Result<()>
    where
        R: PubSubReceiver + 'static,
    {
        let mut state = self.state.write();
        if state.connect_kind() != Some(ConnectKind::First) {
            return Err(ClientError::Stopped);
        }

        *self.connection.write() = Some(connection);

        let mut tasks = self.tasks.lock();
        tasks.pump = Some(tokio::spawn(pump(Arc::downgrade(self), receiver)));

        let weak = Arc::downgrade(self);
        tasks.heartbeat = Some(heartbeat::arm(heartbeat_interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(shared) => {
                        shared.refresh().await;
                        !shared.state().is_stopped()
                    }
                    None => false,
                }
            }
        }));

        *state = ConnectionState::Connected;
        Ok(())
    }

    /// Publish attendance `begin`; failure is reported, never fatal
    async fn announce(&self, connection: &S) {
        let begin = AttendanceEvent::Begin(self.participant.clone()).envelope(&self.client_id);
        if let Err(e) = self.publisher.publish(connection, &begin).await {
            self.emitter.error(format!("attendance begin failed: {}", e));
        }
    }

    /// Publish attendance `end` if the link is up, within [`DEPART_TIMEOUT`].
    ///
    /// Failure is logged; teardown goes on regardless.
    async fn depart(&self, connection: &S) {
        if !connection.is_connected() {
            return;
        }

        let end = AttendanceEvent::End.envelope(&self.client_id);
        let published =
            tokio::time::timeout(DEPART_TIMEOUT, self.publisher.publish(connection, &end)).await;
        match published {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let message = format!("attendance end failed: {}", e);
                self.emitter.log(LogLevel::Error, &message);
            }
            Err(_) => self.emitter.log(LogLevel::Error, "attendance end timed out"),
        }
    }

    /// Heartbeat tick: publish `refresh` if connected, otherwise skip.
    ///
    /// Publish failures are logged and dropped so the timer keeps running.
    async fn refresh(&self) {
        let Some(connection) = self.live_connection() else {
            return;
        };

        if !connection.is_connected() {
            self.emitter.log(LogLevel::Debug, "Heartbeat skipped: not connected");
            return;
        }

        let refresh = AttendanceEvent::Refresh.envelope(&self.client_id);
        if let Err(e) = self.publisher.publish(connection.as_ref(), &refresh).await {
            self.emitter.log(LogLevel::Error, &format!("attendance refresh failed: {}", e));
        }
    }

    async fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.rejoin().await,
            TransportEvent::Reconnecting => {
                self.enter_reconnecting();
                self.emitter.log(LogLevel::Info, "Reconnecting");
                self.emitter.emit(SessionEvent::Reconnect);
            }
            TransportEvent::Closed => self.on_disconnect(DisconnectReason::Close),
            TransportEvent::Disconnected => self.on_disconnect(DisconnectReason::Disconnect),
            TransportEvent::Message { topic, payload } => self.on_message(&topic, &payload),
            TransportEvent::Error(e) => {
                self.enter_reconnecting();
                self.emitter.error(format!("connection error: {}", e));
            }
        }
    }

    fn enter_reconnecting(&self) {
        let mut state = self.state.write();
        if *state == ConnectionState::Connected {
            *state = ConnectionState::Reconnecting;
        }
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        self.enter_reconnecting();
        self.emitter.log(
            LogLevel::Info,
            &format!("Disconnected ({})", reason.as_str()),
        );
        self.emitter.emit(SessionEvent::Disconnect { reason });
    }

    /// Re-join after a reconnect: resubscribe and announce `begin` again.
    ///
    /// Failures here become `error` notifications; `start()` has long
    /// since settled.
    async fn rejoin(&self) {
        if self.state().connect_kind() != Some(ConnectKind::Rejoin) {
            return;
        }
        let connection = self.connection.read().clone();
        let Some(connection) = connection else {
            return;
        };

        self.emitter.log(LogLevel::Info, "Reconnected, rejoining channel");

        for topic in self.topics.inbound() {
            if let Err(e) = connection.subscribe(topic, QoS::STRONGEST).await {
                self.emitter.error(format!("resubscribe to {} failed: {}", topic, e));
            }
        }
        self.announce(connection.as_ref()).await;

        let mut state = self.state.write();
        if state.is_live() {
            *state = ConnectionState::Connected;
        }
    }

    fn on_message(&self, topic: &str, payload: &[u8]) {
        match InboundMessage::from_publish(&self.topics, topic, payload) {
            Ok(message) => {
                self.emitter.log(
                    LogLevel::Debug,
                    &format!("{} message on {}", message.scope, topic),
                );
                self.emitter.emit(SessionEvent::Message(message));
            }
            Err(e) => self.emitter.error(format!("dropped message on {}: {}", topic, e)),
        }
    }
}

impl<S> Drop for Shared<S> {
    fn drop(&mut self) {
        self.tasks.get_mut().abort_all();
    }
}

/// Deliver transport events to the session until the connection ends
async fn pump<S, R>(shared: Weak<Shared<S>>, mut receiver: R)
where
    S: PubSubSender + 'static,
    R: PubSubReceiver + 'static,
{
    while let Some(event) = receiver.recv().await {
        let Some(session) = shared.upgrade() else {
            break;
        };
        if session.state().is_stopped() {
            break;
        }
        debug!("Transport event: {}", event.kind());
        session.on_transport_event(event).await;
    }
}

/// Wait for the broker to accept the connection
pub(crate) async fn await_connack<R>(receiver: &mut R) -> Result<()>
where
    R: PubSubReceiver + ?Sized,
{
    loop {
        match receiver.recv().await {
            Some(TransportEvent::Connected) => return Ok(()),
            Some(TransportEvent::Error(e)) => return Err(e.into()),
            Some(event) => debug!("Ignoring {} before connack", event.kind()),
            None => {
                return Err(ConnectionError::Other {
                    message: "connection closed before connack".to_string(),
                }
                .into())
            }
        }
    }
}
