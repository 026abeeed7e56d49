use std::fmt;

/// Lifecycle state of the physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection has been attempted yet.
    Waiting,
    /// A physical connect is in progress.
    Connecting,
    /// Connected; handshake frames and the connected hook are running.
    PerformingHandshake,
    /// Steady state. Sends are delivered.
    Connected,
    /// The last connection failed or closed.
    Disconnected,
}

impl ConnectionState {
    /// Whether `next` is a legal successor of this state.
    ///
    /// A fresh connect always passes through `PerformingHandshake`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Waiting, Connecting)
                | (Connecting, PerformingHandshake)
                | (Connecting, Disconnected)
                | (PerformingHandshake, Connected)
                | (PerformingHandshake, Disconnected)
                | (Connected, Disconnected)
                | (Disconnected, Connecting)
        )
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Waiting => "waiting",
            ConnectionState::Connecting => "connecting",
            ConnectionState::PerformingHandshake => "performing-handshake",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
