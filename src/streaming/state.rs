use std::fmt;

/// Lifecycle of a WebSocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Reconnecting,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Reconnecting, Connecting)
                | (Connecting, Authenticating)
                | (Connecting, Ready)
                | (Connecting, Disconnected)
                | (Authenticating, Ready)
                | (Authenticating, Disconnected)
                | (Ready, Disconnected)
                | (Disconnected, Reconnecting)
                | (Reconnecting, Disconnected)
        )
    }

    pub fn is_open(self) -> bool {
        matches!(self, SessionState::Authenticating | SessionState::Ready)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Disconnected
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Ready => "ready",
            SessionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Why the socket went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect()` was called. Never reconnects.
    Requested,
    /// Server close, transport error or end of stream.
    Unexpected,
}
