//! Session connection state machine
//!
//! ```text
//! Idle -> Connecting -> Connected <-> Reconnecting -> Stopped
//! ```
//! `Stopped` is terminal. A failed `start()` also ends in `Stopped`.

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

/// What a broker connect means in the state it arrives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectKind {
    /// Completes a pending `start()`: handlers get registered
    First,
    /// Re-join after a blip: resubscribe and announce again
    Rejoin,
}

impl ConnectionState {
    /// A connection is held and outbound traffic is allowed
    pub fn is_live(self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Reconnecting)
    }

    pub fn is_stopped(self) -> bool {
        self == ConnectionState::Stopped
    }

    /// Classify a successful connect.
    ///
    /// `First` is only reachable from `Connecting`, which `start()` leaves
    /// exactly once, so handler registration cannot repeat on reconnect.
    pub(crate) fn connect_kind(self) -> Option<ConnectKind> {
        match self {
            ConnectionState::Connecting => Some(ConnectKind::First),
            ConnectionState::Connected | ConnectionState::Reconnecting => {
                Some(ConnectKind::Rejoin)
            }
            ConnectionState::Idle | ConnectionState::Stopped => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
