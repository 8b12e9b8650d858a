//! Entity batch wire format.
//!
//! Every message starts with a packed 3-byte header `[kind][id lo][id hi]`.
//! Create and Update follow it with a little-endian `u32` length and that
//! many snapshot bytes. A batch is a plain concatenation of messages.

use crate::error::SyncError;

use super::entity::{EntitySnapshot, NetworkEntityId};

pub const HEADER_LEN: usize = 3;
const LENGTH_LEN: usize = 4;

const KIND_CREATE: u8 = 0;
const KIND_UPDATE: u8 = 1;
const KIND_DESTROY: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityMessage {
    Create {
        id: NetworkEntityId,
        snapshot: EntitySnapshot,
    },
    Update {
        id: NetworkEntityId,
        snapshot: EntitySnapshot,
    },
    Destroy {
        id: NetworkEntityId,
    },
}

impl EntityMessage {
    pub fn id(&self) -> NetworkEntityId {
        match self {
            EntityMessage::Create { id, .. }
            | EntityMessage::Update { id, .. }
            | EntityMessage::Destroy { id } => *id,
        }
    }

    fn kind(&self) -> u8 {
        match self {
            EntityMessage::Create { .. } => KIND_CREATE,
            EntityMessage::Update { .. } => KIND_UPDATE,
            EntityMessage::Destroy { .. } => KIND_DESTROY,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            EntityMessage::Create { snapshot, .. } | EntityMessage::Update { snapshot, .. } => {
                HEADER_LEN + LENGTH_LEN + snapshot.len()
            }
            EntityMessage::Destroy { .. } => HEADER_LEN,
        }
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.kind());
        out.extend_from_slice(&self.id().to_le_bytes());
        match self {
            EntityMessage::Create { snapshot, .. } | EntityMessage::Update { snapshot, .. } => {
                out.extend_from_slice(&(snapshot.len() as u32).to_le_bytes());
                out.extend_from_slice(snapshot.as_bytes());
            }
            EntityMessage::Destroy { .. } => {}
        }
    }
}

pub fn encode_batch(messages: &[EntityMessage]) -> Vec<u8> {
    let mut out = Vec::with_capacity(messages.iter().map(EntityMessage::encoded_len).sum());
    for message in messages {
        message.encode_into(&mut out);
    }
    out
}

/// Iterates the messages of one batch. Stops after the first error.
pub struct BatchReader<'a> {
    bytes: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> BatchReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: 0,
            failed: false,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn malformed(&mut self, reason: &'static str) -> SyncError {
        self.failed = true;
        SyncError::MalformedBatch {
            offset: self.offset,
            reason,
        }
    }

    fn read_message(&mut self) -> Result<EntityMessage, SyncError> {
        let rest = &self.bytes[self.offset..];
        if rest.len() < HEADER_LEN {
            return Err(self.malformed("truncated header"));
        }
        let kind = rest[0];
        let id = u16::from_le_bytes([rest[1], rest[2]]);

        if kind == KIND_DESTROY {
            self.offset += HEADER_LEN;
            return Ok(EntityMessage::Destroy { id });
        }
        if kind != KIND_CREATE && kind != KIND_UPDATE {
            return Err(self.malformed("unknown message kind"));
        }

        let body = &rest[HEADER_LEN..];
        if body.len() < LENGTH_LEN {
            return Err(self.malformed("truncated snapshot length"));
        }
        let len = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
        let Some(data) = body.get(LENGTH_LEN..LENGTH_LEN + len) else {
            return Err(self.malformed("truncated snapshot"));
        };
        let snapshot = EntitySnapshot::from_bytes(data.to_vec());
        self.offset += HEADER_LEN + LENGTH_LEN + len;

        Ok(if kind == KIND_CREATE {
            EntityMessage::Create { id, snapshot }
        } else {
            EntityMessage::Update { id, snapshot }
        })
    }
}

impl Iterator for BatchReader<'_> {
    type Item = Result<EntityMessage, SyncError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.bytes.len() {
            return None;
        }
        Some(self.read_message())
    }
}
