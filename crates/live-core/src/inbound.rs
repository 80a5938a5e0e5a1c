//! Inbound message decoding

use serde::Serialize;

use crate::{Error, Result, Scope, Topics};

/// A decoded message received on one of the receiver topics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundMessage {
    pub scope: Scope,
    pub payload: serde_json::Value,
}

impl InboundMessage {
    /// Decode a payload as UTF-8 JSON text
    pub fn decode(scope: Scope, payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| Error::DecodeError(format!("payload is not UTF-8: {}", e)))?;
        let payload =
            serde_json::from_str(text).map_err(|e| Error::DecodeError(e.to_string()))?;

        Ok(Self { scope, payload })
    }

    /// Classify `topic` and decode the payload.
    ///
    /// Fails with [`Error::InvalidTopic`] before looking at the payload
    /// when the topic is not one of the session's inbound addresses.
    pub fn from_publish(topics: &Topics, topic: &str, payload: &[u8]) -> Result<Self> {
        let scope = topics
            .classify(topic)
            .scope()
            .ok_or_else(|| Error::InvalidTopic(topic.to_string()))?;

        Self::decode(scope, payload)
    }
}
