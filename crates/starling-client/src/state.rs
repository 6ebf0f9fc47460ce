//! The per-connection lifecycle, as an explicit machine.
//!
//! Readiness is a state, not a flag: binary traffic is only meaningful in
//! `Ready`, and anything received earlier is discarded. `Failed` is
//! terminal until an external reset re-arms the client.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport, nothing in flight.
    Disconnected,
    /// Transport dial in progress.
    Connecting,
    /// Transport handshake done; waiting for `connection_established`.
    Connected,
    /// Readiness handshake complete — binary streaming permitted.
    Ready,
    /// Transport lost; backoff running before the next attempt.
    Reconnecting,
    /// Attempt budget exhausted. Terminal until an external reset.
    Failed,
    /// Deliberate shutdown. Terminal.
    Closed,
}

impl ConnectionState {
    /// States from which no transition happens without outside action.
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Ready => "ready",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
