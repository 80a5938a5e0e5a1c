//! Session notifications and the log side channel

use live_core::InboundMessage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Callback receiving every diagnostic the session produces
pub type LogCallback = Arc<dyn Fn(LogLevel, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Info,
    Debug,
}

/// Why the transport reported the connection gone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The network connection closed
    Close,
    /// The broker sent DISCONNECT
    Disconnect,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Close => "close",
            DisconnectReason::Disconnect => "disconnect",
        }
    }
}

/// Notifications emitted by a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Reconnect,
    Disconnect { reason: DisconnectReason },
    Message(InboundMessage),
    Error(String),
    /// Serialized text about to be published
    Sent(String),
    SendSuccess(String),
    SendError(String),
}

impl SessionEvent {
    /// Notification name
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Reconnect => "reconnect",
            SessionEvent::Disconnect { .. } => "disconnect",
            SessionEvent::Message(_) => "message",
            SessionEvent::Error(_) => "error",
            SessionEvent::Sent(_) => "sent",
            SessionEvent::SendSuccess(_) => "send:success",
            SessionEvent::SendError(_) => "send:error",
        }
    }
}

/// Fan-out for session notifications plus the log side channel
#[derive(Clone)]
pub(crate) struct Emitter {
    events: broadcast::Sender<SessionEvent>,
    log: Option<LogCallback>,
}

impl Emitter {
    pub(crate) fn new(capacity: usize, log: Option<LogCallback>) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { events, log }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Emit a notification; dropped when nobody is listening
    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => error!("{}", message),
            LogLevel::Info => info!("{}", message),
            LogLevel::Debug => debug!("{}", message),
        }

        if let Some(log) = &self.log {
            log(level, message);
        }
    }

    /// Log at error level and emit an `error` notification
    pub(crate) fn error(&self, message: String) {
        self.log(LogLevel::Error, &message);
        self.emit(SessionEvent::Error(message));
    }
}
