use std::fmt;

use rkyv::api::high::{HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::de::Pool;
use rkyv::rancor::{self, Strategy};
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::error::StoreError;
use crate::session::PeerId;

/// Identity of a live entity inside one process's [`EntityStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityWorldId(pub u64);

impl EntityWorldId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityWorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Wire handle for an entity, private to one sender/receiver pair.
pub type NetworkEntityId = u16;

/// Serialized state of one entity. Opaque to the replication layer, which
/// only stores, compares and forwards it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct EntitySnapshot(Vec<u8>);

impl EntitySnapshot {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn encode<T>(record: &T) -> Result<Self, rancor::Error>
    where
        T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>>,
    {
        rkyv::to_bytes::<rancor::Error>(record).map(|aligned| Self(aligned.into_vec()))
    }

    pub fn decode<T>(&self) -> Result<T, rancor::Error>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>
            + Deserialize<T, Strategy<Pool, rancor::Error>>,
    {
        decode_aligned(&self.0)
    }
}

impl From<Vec<u8>> for EntitySnapshot {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Deserializes an rkyv archive from a buffer of unknown alignment.
pub(crate) fn decode_aligned<T>(bytes: &[u8]) -> Result<T, rancor::Error>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>
        + Deserialize<T, Strategy<Pool, rancor::Error>>,
{
    let mut aligned: AlignedVec = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<T, rancor::Error>(&aligned)
}

/// One entry of the list a caller hands to
/// [`RemotePeer::send_entities`](super::RemotePeer::send_entities).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterestEntry {
    pub entity: EntityWorldId,
    /// Peer the entity was received from, if any. It is never sent back there.
    pub owner: Option<PeerId>,
}

impl InterestEntry {
    pub fn local(entity: EntityWorldId) -> Self {
        Self {
            entity,
            owner: None,
        }
    }

    pub fn owned_by(entity: EntityWorldId, owner: PeerId) -> Self {
        Self {
            entity,
            owner: Some(owner),
        }
    }
}

/// The store owning live entity instances.
///
/// All replication peers share one store and call into it from the tick that
/// drives them; implementations need no internal locking.
pub trait EntityStore {
    /// Current serialized state of `id`, or `None` if it no longer exists.
    fn snapshot(&self, id: EntityWorldId) -> Option<EntitySnapshot>;

    fn create_from(&mut self, snapshot: &EntitySnapshot) -> Result<EntityWorldId, StoreError>;

    fn apply_snapshot(
        &mut self,
        id: EntityWorldId,
        snapshot: &EntitySnapshot,
    ) -> Result<(), StoreError>;

    fn destroy(&mut self, id: EntityWorldId) -> Result<(), StoreError>;
}
