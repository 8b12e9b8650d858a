use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use crate::config::ReplicationConfig;
use crate::error::{StoreError, SyncError};
use crate::session::PeerId;

use super::entity::{EntitySnapshot, EntityStore, EntityWorldId, InterestEntry, NetworkEntityId};
use super::id_pool::NetworkIdPool;
use super::message::{BatchReader, EntityMessage, encode_batch};

#[derive(Debug)]
struct OutboundRecord {
    id: NetworkEntityId,
    since_sent: Duration,
    last_sent: EntitySnapshot,
    seen: bool,
}

#[derive(Debug)]
struct InboundRecord {
    entity: EntityWorldId,
    snapshot: EntitySnapshot,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Encoded batch; empty when nothing needs to go out.
    pub batch: Vec<u8>,
    pub created: usize,
    pub updated: usize,
    pub destroyed: usize,
    /// New entities left untracked because no network id was free.
    pub deferred: usize,
}

impl SendReport {
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveReport {
    pub created: usize,
    pub updated: usize,
    pub destroyed: usize,
}

impl ReceiveReport {
    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.destroyed == 0
    }
}

enum Pending {
    Update(EntityMessage),
    Create(EntityWorldId, EntitySnapshot),
}

/// Replication state for one remote peer, both directions.
#[derive(Debug)]
pub struct RemotePeer {
    peer_id: PeerId,
    config: ReplicationConfig,
    ids: NetworkIdPool,
    outbound: HashMap<EntityWorldId, OutboundRecord>,
    inbound: HashMap<NetworkEntityId, InboundRecord>,
    pending: VecDeque<Vec<u8>>,
    alive: bool,
}

impl RemotePeer {
    pub fn new(peer_id: PeerId, config: ReplicationConfig) -> Self {
        let ids = NetworkIdPool::with_capacity(config.id_capacity);
        Self {
            peer_id,
            config,
            ids,
            outbound: HashMap::new(),
            inbound: HashMap::new(),
            pending: VecDeque::new(),
            alive: true,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn outbound_count(&self) -> usize {
        self.outbound.len()
    }

    pub fn inbound_count(&self) -> usize {
        self.inbound.len()
    }

    pub fn network_id(&self, entity: EntityWorldId) -> Option<NetworkEntityId> {
        self.outbound.get(&entity).map(|record| record.id)
    }

    pub fn local_entity(&self, id: NetworkEntityId) -> Option<EntityWorldId> {
        self.inbound.get(&id).map(|record| record.entity)
    }

    pub fn inbound_entities(&self) -> impl Iterator<Item = EntityWorldId> + '_ {
        self.inbound.values().map(|record| record.entity)
    }

    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    /// Tracked entities missing from `interest` or from the store are
    /// destroyed. Entries owned by this peer are never sent back to it.
    pub fn send_entities<S>(
        &mut self,
        dt: Duration,
        interest: &[InterestEntry],
        store: &S,
    ) -> SendReport
    where
        S: EntityStore + ?Sized,
    {
        let mut report = SendReport::default();
        if !self.alive {
            return report;
        }

        for record in self.outbound.values_mut() {
            record.seen = false;
        }

        let min_interval = self.config.min_update_interval();
        let keepalive = self.config.keepalive_interval();
        let mut queued = Vec::new();
        let mut queued_creates = HashSet::new();

        for entry in interest {
            if entry.owner == Some(self.peer_id) {
                continue;
            }
            let Some(snapshot) = store.snapshot(entry.entity) else {
                continue;
            };

            match self.outbound.get_mut(&entry.entity) {
                Some(record) if record.seen => {}
                Some(record) => {
                    record.seen = true;
                    record.since_sent += dt;

                    let changed = snapshot != record.last_sent;
                    let due = if changed {
                        record.since_sent >= min_interval
                    } else {
                        keepalive.is_some_and(|interval| record.since_sent >= interval)
                    };
                    if due {
                        record.since_sent = Duration::ZERO;
                        queued.push(Pending::Update(EntityMessage::Update {
                            id: record.id,
                            snapshot: snapshot.clone(),
                        }));
                        record.last_sent = snapshot;
                    }
                }
                None => {
                    if queued_creates.insert(entry.entity) {
                        queued.push(Pending::Create(entry.entity, snapshot));
                    }
                }
            }
        }

        let mut messages = Vec::new();

        let gone: Vec<EntityWorldId> = self
            .outbound
            .iter()
            .filter(|(_, record)| !record.seen)
            .map(|(entity, _)| *entity)
            .collect();
        for entity in gone {
            if let Some(record) = self.outbound.remove(&entity) {
                self.ids.release(record.id);
                messages.push(EntityMessage::Destroy { id: record.id });
                report.destroyed += 1;
            }
        }

        for pending in queued {
            match pending {
                Pending::Update(message) => {
                    messages.push(message);
                    report.updated += 1;
                }
                Pending::Create(entity, snapshot) => match self.ids.allocate() {
                    Ok(id) => {
                        messages.push(EntityMessage::Create {
                            id,
                            snapshot: snapshot.clone(),
                        });
                        self.outbound.insert(
                            entity,
                            OutboundRecord {
                                id,
                                since_sent: Duration::ZERO,
                                last_sent: snapshot,
                                seen: true,
                            },
                        );
                        report.created += 1;
                    }
                    Err(_) => report.deferred += 1,
                },
            }
        }

        if report.deferred > 0 {
            log::warn!(
                "Peer {}: network id space exhausted, deferring {} entities",
                self.peer_id,
                report.deferred
            );
        }

        report.batch = encode_batch(&messages);
        report
    }

    pub fn push_inbound(&mut self, batch: Vec<u8>) {
        if self.alive && !batch.is_empty() {
            self.pending.push_back(batch);
        }
    }

    /// The first error drops the rest of the buffered input. Earlier changes
    /// stay applied.
    pub fn receive_entities<S>(&mut self, store: &mut S) -> Result<ReceiveReport, SyncError>
    where
        S: EntityStore + ?Sized,
    {
        let mut report = ReceiveReport::default();

        while let Some(batch) = self.pending.pop_front() {
            for message in BatchReader::new(&batch) {
                if let Err(err) = message.and_then(|m| self.apply(m, store, &mut report)) {
                    self.pending.clear();
                    return Err(err);
                }
            }
        }

        Ok(report)
    }

    fn apply<S>(
        &mut self,
        message: EntityMessage,
        store: &mut S,
        report: &mut ReceiveReport,
    ) -> Result<(), SyncError>
    where
        S: EntityStore + ?Sized,
    {
        match message {
            EntityMessage::Create { id, snapshot } => {
                if self.inbound.contains_key(&id) {
                    return Err(SyncError::DuplicateCreate(id));
                }
                let entity = store.create_from(&snapshot)?;
                self.inbound.insert(id, InboundRecord { entity, snapshot });
                report.created += 1;
            }
            EntityMessage::Update { id, snapshot } => {
                let record = self
                    .inbound
                    .get_mut(&id)
                    .ok_or(SyncError::UnknownEntity(id))?;
                // Keepalives repeat the last state; nothing to apply.
                if record.snapshot != snapshot {
                    store.apply_snapshot(record.entity, &snapshot)?;
                    record.snapshot = snapshot;
                    report.updated += 1;
                }
            }
            EntityMessage::Destroy { id } => {
                let Some(record) = self.inbound.remove(&id) else {
                    log::debug!("Peer {}: ignoring destroy for unbound id {}", self.peer_id, id);
                    return Ok(());
                };
                match store.destroy(record.entity) {
                    Ok(()) | Err(StoreError::NotFound(_)) => {}
                    Err(err) => return Err(err.into()),
                }
                report.destroyed += 1;
            }
        }
        Ok(())
    }

    /// Returns how many replicated entities were removed from the store.
    pub fn destroy<S>(&mut self, store: &mut S) -> usize
    where
        S: EntityStore + ?Sized,
    {
        let mut removed = 0;
        for (_, record) in self.inbound.drain() {
            match store.destroy(record.entity) {
                Ok(()) => removed += 1,
                Err(StoreError::NotFound(_)) => {}
                Err(err) => log::warn!(
                    "Peer {}: failed to destroy entity {}: {}",
                    self.peer_id,
                    record.entity,
                    err
                ),
            }
        }

        self.outbound.clear();
        self.pending.clear();
        self.ids.clear();
        self.alive = false;

        if removed > 0 {
            log::info!("Peer {}: removed {} replicated entities", self.peer_id, removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::MemoryEntityStore;

    const DT: Duration = Duration::from_millis(16);

    fn snap(bytes: &[u8]) -> EntitySnapshot {
        EntitySnapshot::from_bytes(bytes.to_vec())
    }

    fn no_keepalive() -> ReplicationConfig {
        ReplicationConfig {
            keepalive_interval_ms: None,
            ..Default::default()
        }
    }

    fn local(ids: &[EntityWorldId]) -> Vec<InterestEntry> {
        ids.iter().copied().map(InterestEntry::local).collect()
    }

    fn decode(report: &SendReport) -> Vec<EntityMessage> {
        BatchReader::new(&report.batch)
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_first_send_creates() {
        let mut store = MemoryEntityStore::new();
        let a = store.spawn(snap(b"a"));
        let b = store.spawn(snap(b"b"));
        let mut peer = RemotePeer::new(1, no_keepalive());

        let report = peer.send_entities(DT, &local(&[a, b]), &store);

        assert_eq!(report.created, 2);
        assert_eq!(
            decode(&report),
            vec![
                EntityMessage::Create {
                    id: 0,
                    snapshot: snap(b"a")
                },
                EntityMessage::Create {
                    id: 1,
                    snapshot: snap(b"b")
                },
            ]
        );
        assert_eq!(peer.network_id(a), Some(0));
        assert_eq!(peer.outbound_count(), 2);
    }

    #[test]
    fn test_unchanged_entity_sends_nothing() {
        let mut store = MemoryEntityStore::new();
        let a = store.spawn(snap(b"a"));
        let mut peer = RemotePeer::new(1, no_keepalive());

        peer.send_entities(DT, &local(&[a]), &store);
        let report = peer.send_entities(DT, &local(&[a]), &store);

        assert!(report.is_empty());
    }

    #[test]
    fn test_changed_entity_sends_update() {
        let mut store = MemoryEntityStore::new();
        let a = store.spawn(snap(b"a"));
        let mut peer = RemotePeer::new(1, no_keepalive());

        peer.send_entities(DT, &local(&[a]), &store);
        store.set(a, snap(b"a2")).unwrap();
        let report = peer.send_entities(DT, &local(&[a]), &store);

        assert_eq!(
            decode(&report),
            vec![EntityMessage::Update {
                id: 0,
                snapshot: snap(b"a2")
            }]
        );
    }

    #[test]
    fn test_update_throttle() {
        let mut store = MemoryEntityStore::new();
        let a = store.spawn(snap(b"a"));
        let config = ReplicationConfig {
            min_update_interval_ms: 40,
            keepalive_interval_ms: None,
            ..Default::default()
        };
        let mut peer = RemotePeer::new(1, config);

        peer.send_entities(DT, &local(&[a]), &store);
        store.set(a, snap(b"a2")).unwrap();

        assert!(peer.send_entities(DT, &local(&[a]), &store).is_empty());
        assert!(peer.send_entities(DT, &local(&[a]), &store).is_empty());
        assert_eq!(peer.send_entities(DT, &local(&[a]), &store).updated, 1);
    }

    #[test]
    fn test_keepalive_resends_unchanged() {
        let mut store = MemoryEntityStore::new();
        let a = store.spawn(snap(b"a"));
        let config = ReplicationConfig {
            keepalive_interval_ms: Some(100),
            ..Default::default()
        };
        let mut peer = RemotePeer::new(1, config);

        peer.send_entities(DT, &local(&[a]), &store);
        assert!(
            peer.send_entities(Duration::from_millis(60), &local(&[a]), &store)
                .is_empty()
        );
        let report = peer.send_entities(Duration::from_millis(60), &local(&[a]), &store);

        assert_eq!(report.updated, 1);
        assert!(
            peer.send_entities(Duration::from_millis(60), &local(&[a]), &store)
                .is_empty()
        );
    }

    #[test]
    fn test_dropped_from_interest_destroys_and_releases() {
        let mut store = MemoryEntityStore::new();
        let a = store.spawn(snap(b"a"));
        let b = store.spawn(snap(b"b"));
        let mut peer = RemotePeer::new(1, no_keepalive());

        peer.send_entities(DT, &local(&[a, b]), &store);
        let report = peer.send_entities(DT, &local(&[b]), &store);

        assert_eq!(decode(&report), vec![EntityMessage::Destroy { id: 0 }]);
        assert_eq!(peer.network_id(a), None);
        assert_eq!(peer.outbound_count(), 1);
    }

    #[test]
    fn test_missing_from_store_destroys() {
        let mut store = MemoryEntityStore::new();
        let a = store.spawn(snap(b"a"));
        let mut peer = RemotePeer::new(1, no_keepalive());

        peer.send_entities(DT, &local(&[a]), &store);
        store.despawn(a);
        let report = peer.send_entities(DT, &local(&[a]), &store);

        assert_eq!(decode(&report), vec![EntityMessage::Destroy { id: 0 }]);
    }

    #[test]
    fn test_destroy_precedes_create_and_id_is_reused() {
        let mut store = MemoryEntityStore::new();
        let a = store.spawn(snap(b"a"));
        let b = store.spawn(snap(b"b"));
        let config = ReplicationConfig {
            keepalive_interval_ms: None,
            id_capacity: 1,
            ..Default::default()
        };
        let mut peer = RemotePeer::new(1, config);

        peer.send_entities(DT, &local(&[a]), &store);
        let report = peer.send_entities(DT, &local(&[b]), &store);

        assert_eq!(
            decode(&report),
            vec![
                EntityMessage::Destroy { id: 0 },
                EntityMessage::Create {
                    id: 0,
                    snapshot: snap(b"b")
                },
            ]
        );
    }

    #[test]
    fn test_exhaustion_defers_then_retries() {
        let mut store = MemoryEntityStore::new();
        let a = store.spawn(snap(b"a"));
        let b = store.spawn(snap(b"b"));
        let config = ReplicationConfig {
            keepalive_interval_ms: None,
            id_capacity: 1,
            ..Default::default()
        };
        let mut peer = RemotePeer::new(1, config);

        let report = peer.send_entities(DT, &local(&[a, b]), &store);
        assert_eq!((report.created, report.deferred), (1, 1));

        let report = peer.send_entities(DT, &local(&[a, b]), &store);
        assert_eq!((report.created, report.deferred), (0, 1));

        let report = peer.send_entities(DT, &local(&[b]), &store);
        assert_eq!((report.destroyed, report.created, report.deferred), (1, 1, 0));
        assert_eq!(peer.network_id(b), Some(0));
    }

    #[test]
    fn test_entity_owned_by_peer_is_not_echoed() {
        let mut store = MemoryEntityStore::new();
        let mine = store.spawn(snap(b"mine"));
        let theirs = store.spawn(snap(b"theirs"));
        let mut peer = RemotePeer::new(2, no_keepalive());

        let interest = vec![
            InterestEntry::local(mine),
            InterestEntry::owned_by(theirs, 2),
        ];
        let report = peer.send_entities(DT, &interest, &store);

        assert_eq!(report.created, 1);
        assert_eq!(peer.network_id(theirs), None);
    }

    #[test]
    fn test_entity_owned_by_other_peer_is_forwarded() {
        let mut store = MemoryEntityStore::new();
        let relayed = store.spawn(snap(b"relayed"));
        let mut peer = RemotePeer::new(2, no_keepalive());

        let report = peer.send_entities(DT, &[InterestEntry::owned_by(relayed, 3)], &store);

        assert_eq!(report.created, 1);
    }

    #[test]
    fn test_duplicate_interest_entries_create_once() {
        let mut store = MemoryEntityStore::new();
        let a = store.spawn(snap(b"a"));
        let mut peer = RemotePeer::new(1, no_keepalive());

        let report = peer.send_entities(DT, &local(&[a, a]), &store);
        assert_eq!(report.created, 1);

        store.set(a, snap(b"a2")).unwrap();
        let report = peer.send_entities(DT, &local(&[a, a]), &store);
        assert_eq!(report.updated, 1);
    }

    #[test]
    fn test_no_orphan_messages_over_many_ticks() {
        let mut store = MemoryEntityStore::new();
        let entities: Vec<_> = (0..6u8).map(|i| store.spawn(snap(&[i]))).collect();
        let config = ReplicationConfig {
            keepalive_interval_ms: Some(32),
            id_capacity: 4,
            ..Default::default()
        };
        let mut peer = RemotePeer::new(1, config);
        let mut live: HashSet<NetworkEntityId> = HashSet::new();

        for tick in 0..40usize {
            let interest: Vec<_> = entities
                .iter()
                .enumerate()
                .filter(|(i, _)| (tick + i) % 3 != 0)
                .map(|(_, e)| InterestEntry::local(*e))
                .collect();
            if tick % 5 == 0 {
                let target = entities[tick % entities.len()];
                store.set(target, snap(&[tick as u8, 0xff])).unwrap();
            }

            let report = peer.send_entities(DT, &interest, &store);
            for message in decode(&report) {
                match message {
                    EntityMessage::Create { id, .. } => assert!(live.insert(id)),
                    EntityMessage::Update { id, .. } => assert!(live.contains(&id)),
                    EntityMessage::Destroy { id } => assert!(live.remove(&id)),
                }
            }

            let bound: HashSet<_> = entities.iter().filter_map(|e| peer.network_id(*e)).collect();
            assert_eq!(bound, live);
            assert!(live.len() <= 4);
        }
    }

    #[test]
    fn test_round_trip_preserves_snapshot_bytes() {
        let mut sender_store = MemoryEntityStore::new();
        let payload: Vec<u8> = (0..=255).collect();
        let a = sender_store.spawn(snap(&payload));
        let mut sender = RemotePeer::new(1, no_keepalive());
        let mut receiver = RemotePeer::new(0, no_keepalive());
        let mut receiver_store = MemoryEntityStore::new();

        let report = sender.send_entities(DT, &local(&[a]), &sender_store);
        receiver.push_inbound(report.batch);
        let received = receiver.receive_entities(&mut receiver_store).unwrap();

        assert_eq!(received.created, 1);
        let replica = receiver.local_entity(0).unwrap();
        assert_eq!(receiver_store.get(replica).unwrap().as_bytes(), &payload[..]);
    }

    #[test]
    fn test_receive_update_and_destroy() {
        let mut sender_store = MemoryEntityStore::new();
        let a = sender_store.spawn(snap(b"v1"));
        let mut sender = RemotePeer::new(1, no_keepalive());
        let mut receiver = RemotePeer::new(0, no_keepalive());
        let mut receiver_store = MemoryEntityStore::new();

        receiver.push_inbound(sender.send_entities(DT, &local(&[a]), &sender_store).batch);
        sender_store.set(a, snap(b"v2")).unwrap();
        receiver.push_inbound(sender.send_entities(DT, &local(&[a]), &sender_store).batch);

        let report = receiver.receive_entities(&mut receiver_store).unwrap();
        assert_eq!((report.created, report.updated), (1, 1));
        let replica = receiver.local_entity(0).unwrap();
        assert_eq!(receiver_store.get(replica), Some(&snap(b"v2")));

        receiver.push_inbound(sender.send_entities(DT, &[], &sender_store).batch);
        let report = receiver.receive_entities(&mut receiver_store).unwrap();
        assert_eq!(report.destroyed, 1);
        assert!(!receiver_store.contains(replica));
        assert_eq!(receiver.inbound_count(), 0);
    }

    #[test]
    fn test_keepalive_with_same_state_is_not_reapplied() {
        let mut sender_store = MemoryEntityStore::new();
        let a = sender_store.spawn(snap(b"still"));
        let config = ReplicationConfig {
            keepalive_interval_ms: Some(10),
            ..Default::default()
        };
        let mut sender = RemotePeer::new(1, config);
        let mut receiver = RemotePeer::new(0, no_keepalive());
        let mut receiver_store = MemoryEntityStore::new();

        receiver.push_inbound(sender.send_entities(DT, &local(&[a]), &sender_store).batch);
        receiver.receive_entities(&mut receiver_store).unwrap();
        let revision = receiver_store.revision();

        let keepalive = sender.send_entities(DT, &local(&[a]), &sender_store);
        assert_eq!(keepalive.updated, 1);
        receiver.push_inbound(keepalive.batch);
        let report = receiver.receive_entities(&mut receiver_store).unwrap();

        assert!(report.is_empty());
        assert_eq!(receiver_store.revision(), revision);
    }

    #[test]
    fn test_receive_with_nothing_pending_leaves_store_untouched() {
        let mut store = MemoryEntityStore::new();
        store.spawn(snap(b"x"));
        let revision = store.revision();
        let mut peer = RemotePeer::new(1, no_keepalive());

        let report = peer.receive_entities(&mut store).unwrap();

        assert!(report.is_empty());
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn test_update_for_unknown_id_discards_rest() {
        let mut store = MemoryEntityStore::new();
        let mut peer = RemotePeer::new(1, no_keepalive());

        peer.push_inbound(encode_batch(&[EntityMessage::Update {
            id: 5,
            snapshot: snap(b"?"),
        }]));
        peer.push_inbound(encode_batch(&[EntityMessage::Create {
            id: 6,
            snapshot: snap(b"later"),
        }]));

        assert_eq!(
            peer.receive_entities(&mut store),
            Err(SyncError::UnknownEntity(5))
        );
        assert_eq!(peer.pending_batches(), 0);
        assert_eq!(store.entity_count(), 0);
    }

    #[test]
    fn test_duplicate_create_is_rejected() {
        let mut store = MemoryEntityStore::new();
        let mut peer = RemotePeer::new(1, no_keepalive());
        let create = EntityMessage::Create {
            id: 1,
            snapshot: snap(b"a"),
        };

        peer.push_inbound(encode_batch(&[create.clone(), create]));

        assert_eq!(
            peer.receive_entities(&mut store),
            Err(SyncError::DuplicateCreate(1))
        );
        assert_eq!(store.entity_count(), 1);
    }

    #[test]
    fn test_duplicate_destroy_is_ignored() {
        let mut store = MemoryEntityStore::new();
        let mut peer = RemotePeer::new(1, no_keepalive());

        peer.push_inbound(encode_batch(&[
            EntityMessage::Create {
                id: 1,
                snapshot: snap(b"a"),
            },
            EntityMessage::Destroy { id: 1 },
            EntityMessage::Destroy { id: 1 },
        ]));

        let report = peer.receive_entities(&mut store).unwrap();
        assert_eq!((report.created, report.destroyed), (1, 1));
        assert_eq!(store.entity_count(), 0);
    }

    #[test]
    fn test_malformed_batch_is_reported() {
        let mut store = MemoryEntityStore::new();
        let mut peer = RemotePeer::new(1, no_keepalive());

        peer.push_inbound(vec![0, 1, 0, 200, 0, 0, 0, 1]);

        assert!(matches!(
            peer.receive_entities(&mut store),
            Err(SyncError::MalformedBatch { .. })
        ));
    }

    #[test]
    fn test_destroy_removes_replicated_entities() {
        let mut store = MemoryEntityStore::new();
        let own = store.spawn(snap(b"own"));
        let mut peer = RemotePeer::new(1, no_keepalive());

        peer.push_inbound(encode_batch(&[
            EntityMessage::Create {
                id: 0,
                snapshot: snap(b"a"),
            },
            EntityMessage::Create {
                id: 1,
                snapshot: snap(b"b"),
            },
            EntityMessage::Create {
                id: 2,
                snapshot: snap(b"c"),
            },
        ]));
        peer.receive_entities(&mut store).unwrap();
        peer.send_entities(DT, &local(&[own]), &store);
        assert_eq!(store.entity_count(), 4);

        assert_eq!(peer.destroy(&mut store), 3);

        assert!(!peer.is_alive());
        assert_eq!(store.ids(), vec![own]);
        assert_eq!(peer.outbound_count(), 0);
        assert!(peer.send_entities(DT, &local(&[own]), &store).is_empty());

        peer.push_inbound(vec![2, 0, 0]);
        assert_eq!(peer.pending_batches(), 0);
    }
}
