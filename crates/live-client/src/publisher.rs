//! Outbound publisher for the sender topic

use bytes::Bytes;
use live_transport::{PubSubSender, QoS};
use serde::Serialize;

use crate::error::{ClientError, Result};
use crate::events::{Emitter, SessionEvent};

/// Serializes messages and publishes them on the session's sender topic
/// with the strongest delivery guarantee
pub(crate) struct Publisher {
    topic: String,
    emitter: Emitter,
}

impl Publisher {
    pub(crate) fn new(topic: &str, emitter: Emitter) -> Self {
        Self {
            topic: topic.to_string(),
            emitter,
        }
    }

    /// Publish `message` as JSON text on `connection`.
    ///
    /// Emits `sent` before the publish, then `send:success` or `send:error`.
    pub(crate) async fn publish<S, M>(&self, connection: &S, message: &M) -> Result<()>
    where
        S: PubSubSender + ?Sized,
        M: Serialize + ?Sized,
    {
        let text =
            serde_json::to_string(message).map_err(|e| ClientError::Serialize(e.to_string()))?;

        self.emitter.emit(SessionEvent::Sent(text.clone()));

        match connection
            .publish(&self.topic, QoS::STRONGEST, false, Bytes::from(text.clone()))
            .await
        {
            Ok(()) => {
                self.emitter.emit(SessionEvent::SendSuccess(text));
                Ok(())
            }
            Err(e) => {
                self.emitter.emit(SessionEvent::SendError(e.to_string()));
                Err(ClientError::Publish(e))
            }
        }
    }
}
