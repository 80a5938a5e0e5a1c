//! Transport trait definitions

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Result, TransportError};
use crate::options::{ConnectOptions, QoS};

/// Events reported by a live connection
#[derive(Debug)]
pub enum TransportEvent {
    /// The broker accepted a connection (first or re-established)
    Connected,
    /// A reconnect attempt is about to start
    Reconnecting,
    /// The network connection went away
    Closed,
    /// The broker sent DISCONNECT
    Disconnected,
    /// A publish arrived on a subscribed topic
    Message { topic: String, payload: Bytes },
    /// A connect attempt or the live connection failed
    Error(TransportError),
}

/// Outbound half of a connection
#[async_trait]
pub trait PubSubSender: Send + Sync {
    /// Subscribe to a single topic
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<()>;

    /// Publish a payload
    async fn publish(&self, topic: &str, qos: QoS, retain: bool, payload: Bytes) -> Result<()>;

    /// Whether the broker connection is currently established
    fn is_connected(&self) -> bool;

    /// Close gracefully; the last will is not delivered.
    ///
    /// Returns once the connection and its background task are gone.
    async fn close(&self) -> Result<()>;
}

/// Inbound half of a connection
#[async_trait]
pub trait PubSubReceiver: Send {
    /// Receive the next event, `None` once the connection is gone for good
    async fn recv(&mut self) -> Option<TransportEvent>;
}

/// A publish/subscribe transport
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    type Sender: PubSubSender + 'static;
    type Receiver: PubSubReceiver + 'static;

    /// Start connecting.
    ///
    /// Returns as soon as the attempt is underway; the outcome arrives on
    /// the receiver as [`TransportEvent::Connected`] or
    /// [`TransportEvent::Error`].
    async fn connect(&self, options: &ConnectOptions) -> Result<(Self::Sender, Self::Receiver)>;
}

impl TransportEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::Connected => "connected",
            TransportEvent::Reconnecting => "reconnecting",
            TransportEvent::Closed => "closed",
            TransportEvent::Disconnected => "disconnected",
            TransportEvent::Message { .. } => "message",
            TransportEvent::Error(_) => "error",
        }
    }
}

impl From<TransportError> for TransportEvent {
    fn from(e: TransportError) -> Self {
        TransportEvent::Error(e)
    }
}
