//! Topic addressing
//!
//! Every channel owns three topics:
//! ```text
//! stream/{channel}/sender                 outbound, read by the sender peer
//! stream/{channel}/receiver               inbound broadcast to all receivers
//! stream/{channel}/receiver/{client_id}   inbound unicast to one receiver
//! ```

use serde::{Deserialize, Serialize};

use crate::{Error, Result, TOPIC_ROOT};

/// Outbound topic read by the channel's sender peer
pub fn sender_topic(channel: &str) -> String {
    format!("{}/{}/sender", TOPIC_ROOT, channel)
}

/// Inbound topic shared by every receiver on the channel
pub fn broadcast_topic(channel: &str) -> String {
    format!("{}/{}/receiver", TOPIC_ROOT, channel)
}

/// Inbound topic addressed to a single receiver
pub fn unicast_topic(channel: &str, client_id: &str) -> String {
    format!("{}/{}/receiver/{}", TOPIC_ROOT, channel, client_id)
}

/// Classify an inbound topic for the given channel and client
pub fn classify(topic: &str, channel: &str, client_id: &str) -> TopicClass {
    if topic == broadcast_topic(channel) {
        TopicClass::Broadcast
    } else if topic == unicast_topic(channel, client_id) {
        TopicClass::Unicast
    } else {
        TopicClass::Invalid
    }
}

/// Check that a name is usable as a single topic segment.
///
/// Separators and MQTT wildcards would change the topic shape, and an
/// empty segment would collapse two levels into one.
fn validate_segment(value: &str) -> bool {
    !value.is_empty() && !value.contains(['/', '+', '#', '\0'])
}

/// Who an inbound message was addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Broadcast,
    Unicast,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Broadcast => "broadcast",
            Scope::Unicast => "unicast",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of classifying an inbound topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicClass {
    Broadcast,
    Unicast,
    Invalid,
}

impl TopicClass {
    /// Scope for a recognized topic, `None` for [`TopicClass::Invalid`]
    pub fn scope(self) -> Option<Scope> {
        match self {
            TopicClass::Broadcast => Some(Scope::Broadcast),
            TopicClass::Unicast => Some(Scope::Unicast),
            TopicClass::Invalid => None,
        }
    }
}

/// The three topic addresses of one session.
///
/// Computed once from the channel and client id and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    sender: String,
    broadcast: String,
    unicast: String,
}

impl Topics {
    /// Derive the topics, rejecting names that are not a single topic segment
    pub fn new(channel: &str, client_id: &str) -> Result<Self> {
        if !validate_segment(channel) {
            return Err(Error::InvalidChannel(channel.to_string()));
        }
        if !validate_segment(client_id) {
            return Err(Error::InvalidClientId(client_id.to_string()));
        }

        Ok(Self {
            sender: sender_topic(channel),
            broadcast: broadcast_topic(channel),
            unicast: unicast_topic(channel, client_id),
        })
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn broadcast(&self) -> &str {
        &self.broadcast
    }

    pub fn unicast(&self) -> &str {
        &self.unicast
    }

    /// Topics a receiver subscribes to, broadcast first
    pub fn inbound(&self) -> [&str; 2] {
        [&self.broadcast, &self.unicast]
    }

    /// Classify an inbound topic against this session's addresses
    pub fn classify(&self, topic: &str) -> TopicClass {
        if topic == self.broadcast {
            TopicClass::Broadcast
        } else if topic == self.unicast {
            TopicClass::Unicast
        } else {
            TopicClass::Invalid
        }
    }
}
