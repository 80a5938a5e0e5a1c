//! Live Transport Layer
//!
//! The publish/subscribe seam the session client is written against, plus
//! its production implementation:
//! - [`PubSubTransport`] / [`PubSubSender`] / [`PubSubReceiver`] traits
//! - [`ConnectOptions`], [`BrokerUrl`], [`LastWill`], [`QoS`]
//! - MQTT 3.1.1 over TCP or TLS via rumqttc (feature `mqtt`)

pub mod error;
pub mod options;
pub mod traits;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "mqtt")]
mod tls;

pub use error::{Result, TransportError};
pub use options::{compose_url, BrokerUrl, ConnectOptions, LastWill, QoS, Scheme};
pub use traits::{PubSubReceiver, PubSubSender, PubSubTransport, TransportEvent};

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttReceiver, MqttSender, MqttTransport};
