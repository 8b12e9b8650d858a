use rkyv::rancor;

use crate::replication::{EntityWorldId, NetworkEntityId};
use crate::session::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("shared data not found: {0}")]
    SharedDataNotFound(String),
    #[error("no connection to peer {0}")]
    UnknownPeer(PeerId),
    #[error("shared data codec failed: {0}")]
    SharedData(rancor::Error),
}

/// Failures reported by an [`EntityStore`](crate::replication::EntityStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("entity {0} not found")]
    NotFound(EntityWorldId),
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("update for network entity {0} which was never created")]
    UnknownEntity(NetworkEntityId),
    #[error("create for network entity {0} which is already bound")]
    DuplicateCreate(NetworkEntityId),
    #[error("network id space exhausted ({0} entities live)")]
    IdSpaceExhausted(usize),
    #[error("malformed entity batch at byte {offset}: {reason}")]
    MalformedBatch { offset: usize, reason: &'static str },
    #[error(transparent)]
    Store(#[from] StoreError),
}
