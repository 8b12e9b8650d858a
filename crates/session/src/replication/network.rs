use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use rkyv::rancor;
use rkyv::{Archive, Deserialize, Serialize};

use crate::config::ReplicationConfig;
use crate::error::{SessionError, SyncError};
use crate::events::{DisconnectReason, SessionEvent};
use crate::net::TransportService;
use crate::session::{PeerEvent, PeerId, Session};

use super::entity::{EntityStore, EntityWorldId, InterestEntry, decode_aligned};
use super::peer::{RemotePeer, SendReport};

/// First byte of every frame exchanged by an [`EntityNetworkSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    Entities = 1,
    Message = 2,
    SharedData = 3,
}

impl Channel {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Channel::Entities),
            2 => Some(Channel::Message),
            3 => Some(Channel::SharedData),
            _ => None,
        }
    }

    fn frame(self, payload: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(self as u8);
        frame.extend_from_slice(payload);
        frame
    }
}

#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq)]
struct SharedDataEntry {
    key: String,
    data: Vec<u8>,
}

/// A [`Session`] with one [`RemotePeer`] per connected peer.
pub struct EntityNetworkSession<T: TransportService> {
    session: Session<T>,
    config: ReplicationConfig,
    peers: BTreeMap<PeerId, RemotePeer>,
    messages: VecDeque<(PeerId, Vec<u8>)>,
    events: VecDeque<SessionEvent>,
}

impl<T: TransportService> EntityNetworkSession<T> {
    pub fn new(session: Session<T>, config: ReplicationConfig) -> Self {
        Self {
            session,
            config,
            peers: BTreeMap::new(),
            messages: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<T> {
        &mut self.session
    }

    pub fn peer(&self, peer: PeerId) -> Option<&RemotePeer> {
        self.peers.get(&peer)
    }

    pub fn peer_ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers.keys().copied()
    }

    pub fn owners(&self) -> HashMap<EntityWorldId, PeerId> {
        self.peers
            .iter()
            .flat_map(|(id, peer)| peer.inbound_entities().map(move |entity| (entity, *id)))
            .collect()
    }

    /// Interest list covering `entities`, tagged with the peer each one was
    /// received from.
    pub fn interest_for(&self, entities: &[EntityWorldId]) -> Vec<InterestEntry> {
        let owners = self.owners();
        entities
            .iter()
            .map(|entity| InterestEntry {
                entity: *entity,
                owner: owners.get(entity).copied(),
            })
            .collect()
    }

    pub fn update<S>(&mut self, store: &mut S)
    where
        S: EntityStore + ?Sized,
    {
        self.session.update();

        let peer_events: Vec<PeerEvent> = self.session.drain_peer_events().collect();
        for event in peer_events {
            match event {
                PeerEvent::Joined(peer) => self.on_peer_joined(peer),
                PeerEvent::Left(peer) => self.remove_peer(peer, DisconnectReason::Closed, store),
            }
        }

        while let Some((peer, frame)) = self.session.receive() {
            self.dispatch(peer, frame);
        }

        let mut violations = Vec::new();
        for (id, peer) in self.peers.iter_mut() {
            if let Err(err) = peer.receive_entities(store) {
                violations.push((*id, err));
            }
        }
        for (peer, error) in violations {
            self.on_protocol_violation(peer, error, store);
        }

        let changes = self.session.take_shared_data_changes();
        if self.session.is_host() && !changes.is_empty() && !self.peers.is_empty() {
            if let Some(frame) = encode_shared_data(changes) {
                self.session.send(frame);
            }
        }
    }

    /// Peers with nothing to send get no frame.
    pub fn send_entities<S, F>(
        &mut self,
        dt: Duration,
        store: &S,
        mut interest: F,
    ) -> Vec<(PeerId, SendReport)>
    where
        S: EntityStore + ?Sized,
        F: FnMut(PeerId) -> Vec<InterestEntry>,
    {
        let mut reports = Vec::with_capacity(self.peers.len());
        for (id, peer) in self.peers.iter_mut() {
            let entries = interest(*id);
            let report = peer.send_entities(dt, &entries, store);
            if !report.is_empty() {
                let frame = Channel::Entities.frame(&report.batch);
                if let Err(err) = self.session.send_to(*id, frame) {
                    log::warn!("Dropping entity batch: {}", err);
                }
            }
            reports.push((*id, report));
        }
        reports
    }

    pub fn send_message(&mut self, peer: PeerId, payload: &[u8]) -> Result<(), SessionError> {
        self.session.send_to(peer, Channel::Message.frame(payload))
    }

    pub fn broadcast_message(&mut self, payload: &[u8]) {
        self.session.send(Channel::Message.frame(payload));
    }

    pub fn drain_messages(&mut self) -> impl Iterator<Item = (PeerId, Vec<u8>)> + '_ {
        self.messages.drain(..)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.events.drain(..)
    }

    /// Disconnects `peer` and destroys the entities it replicated to us.
    pub fn kick<S>(&mut self, peer: PeerId, store: &mut S) -> Result<(), SessionError>
    where
        S: EntityStore + ?Sized,
    {
        self.session.disconnect(peer)?;
        self.remove_peer(peer, DisconnectReason::Kicked, store);
        Ok(())
    }

    pub fn close<S>(&mut self, store: &mut S)
    where
        S: EntityStore + ?Sized,
    {
        self.session.close();
        self.session.drain_peer_events().for_each(drop);
        let ids: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer in ids {
            self.remove_peer(peer, DisconnectReason::SessionClosed, store);
        }
    }

    fn on_peer_joined(&mut self, peer: PeerId) {
        self.peers
            .insert(peer, RemotePeer::new(peer, self.config.clone()));
        self.events.push_back(SessionEvent::PeerConnected { peer });

        if self.session.is_host() {
            let entries = self.session.shared_data_entries();
            if !entries.is_empty() {
                if let Some(frame) = encode_shared_data(entries) {
                    if let Err(err) = self.session.send_to(peer, frame) {
                        log::warn!("Failed to send shared data: {}", err);
                    }
                }
            }
        }
    }

    fn remove_peer<S>(&mut self, peer: PeerId, reason: DisconnectReason, store: &mut S)
    where
        S: EntityStore + ?Sized,
    {
        let Some(mut remote) = self.peers.remove(&peer) else {
            return;
        };
        let entities_removed = remote.destroy(store);
        log::info!(
            "Peer {} removed ({}), {} entities destroyed",
            peer,
            reason.as_str(),
            entities_removed
        );
        self.events.push_back(SessionEvent::PeerDisconnected {
            peer,
            reason,
            entities_removed,
        });
    }

    fn on_protocol_violation<S>(&mut self, peer: PeerId, error: SyncError, store: &mut S)
    where
        S: EntityStore + ?Sized,
    {
        log::warn!("Protocol violation from peer {}: {}", peer, error);
        self.events
            .push_back(SessionEvent::ProtocolViolation { peer, error });
        if let Err(err) = self.session.disconnect(peer) {
            log::debug!("Peer {} already gone: {}", peer, err);
        }
        self.remove_peer(peer, DisconnectReason::ProtocolViolation, store);
    }

    fn dispatch(&mut self, peer: PeerId, frame: Vec<u8>) {
        let Some((&channel, payload)) = frame.split_first() else {
            log::warn!("Empty frame from peer {}", peer);
            return;
        };

        match Channel::from_byte(channel) {
            Some(Channel::Entities) => match self.peers.get_mut(&peer) {
                Some(remote) => remote.push_inbound(payload.to_vec()),
                None => log::debug!("Entity batch from unknown peer {}", peer),
            },
            Some(Channel::Message) => self.messages.push_back((peer, payload.to_vec())),
            Some(Channel::SharedData) => self.apply_shared_data(peer, payload),
            None => log::warn!("Unknown channel {} from peer {}", channel, peer),
        }
    }

    fn apply_shared_data(&mut self, peer: PeerId, payload: &[u8]) {
        if self.session.is_host() {
            log::warn!("Ignoring shared data sent by peer {}", peer);
            return;
        }
        let entries: Vec<SharedDataEntry> = match decode_aligned(payload) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("Malformed shared data from peer {}: {}", peer, err);
                return;
            }
        };
        for entry in entries {
            log::debug!("Shared data '{}' updated", entry.key);
            self.events.push_back(SessionEvent::SharedDataChanged {
                key: entry.key.clone(),
            });
            self.session.apply_remote_shared_data(entry.key, entry.data);
        }
    }
}

fn encode_shared_data(entries: Vec<(String, Vec<u8>)>) -> Option<Vec<u8>> {
    let entries: Vec<SharedDataEntry> = entries
        .into_iter()
        .map(|(key, data)| SharedDataEntry { key, data })
        .collect();
    match rkyv::to_bytes::<rancor::Error>(&entries) {
        Ok(bytes) => Some(Channel::SharedData.frame(&bytes)),
        Err(err) => {
            log::warn!("Failed to encode shared data: {}", err);
            None
        }
    }
}
