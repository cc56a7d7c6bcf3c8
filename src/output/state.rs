use std::fmt;

/// CloseReason records why an output left the connected state.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The producer finished and closed the output.
    Trailer,
    /// A write to the session failed. Every later packet is dropped.
    ConnectivityLost,
    /// The session was constructed but could not reach the destination.
    ConnectFailed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match *self {
            CloseReason::Trailer => "trailer",
            CloseReason::ConnectivityLost => "connectivity lost",
            CloseReason::ConnectFailed => "connect failed",
        };
        write!(f, "{s}")
    }
}

/// ConnectionState is the lifecycle of a [`WhipOutput`]. `Closed` is terminal.
///
/// [`WhipOutput`]: crate::output::WhipOutput
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Uninitialized,
    Connecting,
    Connected,
    Closed(CloseReason),
}

impl ConnectionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, ConnectionState::Closed(_))
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ConnectionState::Uninitialized => write!(f, "uninitialized"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closed(reason) => write!(f, "closed ({reason})"),
        }
    }
}

/// OutputStats counts what happened to the packets handed to an output.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub struct OutputStats {
    /// Packets the session accepted.
    pub packets_written: u64,
    /// Payload bytes the session accepted.
    pub bytes_written: u64,
    /// Packets dropped because no session was live, including the one whose
    /// write failed.
    pub packets_dropped: u64,
}
