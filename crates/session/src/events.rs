use crate::error::SyncError;
use crate::session::PeerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PeerConnected {
        peer: PeerId,
    },
    PeerDisconnected {
        peer: PeerId,
        reason: DisconnectReason,
        entities_removed: usize,
    },
    ProtocolViolation {
        peer: PeerId,
        error: SyncError,
    },
    SharedDataChanged {
        key: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The connection closed on its own: remote hang-up or timeout.
    Closed,
    Kicked,
    ProtocolViolation,
    SessionClosed,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Closed => "connection closed",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::ProtocolViolation => "protocol violation",
            DisconnectReason::SessionClosed => "session closed",
        }
    }
}
