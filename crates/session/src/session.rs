use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rkyv::api::high::{HighSerializer, HighValidator};
use rkyv::bytecheck::CheckBytes;
use rkyv::de::Pool;
use rkyv::rancor::{self, Strategy};
use rkyv::ser::allocator::ArenaHandle;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::net::{Connection, ConnectionStatus, TransportService};
use crate::replication::decode_aligned;

pub type PeerId = u8;

/// Id under which a client sees the host.
pub const HOST_PEER_ID: PeerId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    Undefined,
    Host,
    Client,
}

impl SessionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionRole::Undefined => "undefined",
            SessionRole::Host => "host",
            SessionRole::Client => "client",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerEvent {
    Joined(PeerId),
    Left(PeerId),
}

struct PeerLink {
    id: PeerId,
    connection: Box<dyn Connection>,
}

enum RoleState {
    Undefined,
    Host {
        port: u16,
        peers: Vec<PeerLink>,
        next_receive: usize,
    },
    Client {
        server: Option<PeerLink>,
        joined: bool,
    },
}

/// Host or client side of a multiplayer session, plus the key/value data
/// shared by all participants.
pub struct Session<S: TransportService> {
    transport: S,
    state: RoleState,
    max_clients: usize,
    shared_data: BTreeMap<String, Vec<u8>>,
    dirty_keys: BTreeSet<String>,
    events: VecDeque<PeerEvent>,
}

impl<S: TransportService> Session<S> {
    pub fn new(transport: S, config: SessionConfig) -> Self {
        Self {
            transport,
            state: RoleState::Undefined,
            max_clients: config.max_clients,
            shared_data: BTreeMap::new(),
            dirty_keys: BTreeSet::new(),
            events: VecDeque::new(),
        }
    }

    pub fn transport(&self) -> &S {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut S {
        &mut self.transport
    }

    pub fn role(&self) -> SessionRole {
        match self.state {
            RoleState::Undefined => SessionRole::Undefined,
            RoleState::Host { .. } => SessionRole::Host,
            RoleState::Client { .. } => SessionRole::Client,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self.state, RoleState::Host { .. })
    }

    pub fn host_port(&self) -> Option<u16> {
        match self.state {
            RoleState::Host { port, .. } => Some(port),
            _ => None,
        }
    }

    /// Panics if the role was already set.
    pub fn host(&mut self, port: u16) {
        assert!(
            matches!(self.state, RoleState::Undefined),
            "session role already set to {}",
            self.role().as_str()
        );
        log::info!(
            "Hosting session on port {} ({} seats)",
            port,
            self.max_clients
        );
        self.state = RoleState::Host {
            port,
            peers: Vec::new(),
            next_receive: 0,
        };
    }

    /// Panics if the role was already set. A failed connect shows up as a
    /// `Closed` status.
    pub fn join(&mut self, address: &str, port: u16) {
        assert!(
            matches!(self.state, RoleState::Undefined),
            "session role already set to {}",
            self.role().as_str()
        );
        log::info!("Joining session at {}:{}", address, port);
        let connection = self.transport.connect(address, port);
        self.state = RoleState::Client {
            server: Some(PeerLink {
                id: HOST_PEER_ID,
                connection,
            }),
            joined: false,
        };
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Takes effect on the next update. Peers above the new limit stay
    /// connected.
    pub fn set_max_clients(&mut self, max_clients: usize) {
        self.max_clients = max_clients;
    }

    pub fn update(&mut self) {
        self.transport.update();
        self.reap_closed();

        match &mut self.state {
            RoleState::Undefined => {}
            RoleState::Host { peers, .. } => {
                let has_room = peers.len() + 1 < self.max_clients;
                self.transport.set_accepting_connections(has_room);
                if has_room {
                    if let Some(connection) = self.transport.try_accept_connection() {
                        admit(peers, connection, &mut self.events);
                    }
                }
            }
            RoleState::Client { server, joined } => {
                if let Some(link) = server {
                    if !*joined && link.connection.status() == ConnectionStatus::Open {
                        *joined = true;
                        log::info!("Connected to host");
                        self.events.push_back(PeerEvent::Joined(HOST_PEER_ID));
                    }
                }
            }
        }
    }

    fn reap_closed(&mut self) {
        match &mut self.state {
            RoleState::Undefined => {}
            RoleState::Host {
                peers,
                next_receive,
                ..
            } => {
                let events = &mut self.events;
                peers.retain(|link| {
                    let closed = link.connection.status() == ConnectionStatus::Closed;
                    if closed {
                        log::info!("Peer {} disconnected", link.id);
                        events.push_back(PeerEvent::Left(link.id));
                    }
                    !closed
                });
                if *next_receive >= peers.len() {
                    *next_receive = 0;
                }
            }
            RoleState::Client { server, joined } => {
                let closed = server
                    .as_ref()
                    .is_some_and(|link| link.connection.status() == ConnectionStatus::Closed);
                if closed {
                    *server = None;
                    if *joined {
                        log::info!("Lost connection to host");
                        self.events.push_back(PeerEvent::Left(HOST_PEER_ID));
                    } else {
                        log::warn!("Could not connect to host");
                    }
                }
            }
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match &self.state {
            RoleState::Undefined => ConnectionStatus::Undefined,
            RoleState::Host { .. } => ConnectionStatus::Open,
            RoleState::Client { server, .. } => server
                .as_ref()
                .map_or(ConnectionStatus::Closed, |link| link.connection.status()),
        }
    }

    pub fn connection_count(&self) -> usize {
        match &self.state {
            RoleState::Undefined => 0,
            RoleState::Host { peers, .. } => peers.len(),
            RoleState::Client { server, .. } => usize::from(server.is_some()),
        }
    }

    pub fn peers(&self) -> Vec<PeerId> {
        match &self.state {
            RoleState::Undefined => Vec::new(),
            RoleState::Host { peers, .. } => peers.iter().map(|link| link.id).collect(),
            RoleState::Client { server, .. } => server.iter().map(|link| link.id).collect(),
        }
    }

    pub fn peer_status(&self, peer: PeerId) -> Option<ConnectionStatus> {
        self.link(peer).map(|link| link.connection.status())
    }

    pub fn drain_peer_events(&mut self) -> impl Iterator<Item = PeerEvent> + '_ {
        self.events.drain(..)
    }

    /// Host: sends `frame` to every peer. Client: sends it to the host.
    pub fn send(&mut self, frame: Vec<u8>) {
        match &mut self.state {
            RoleState::Undefined => log::debug!("Dropping frame sent before a role was set"),
            RoleState::Host { peers, .. } => {
                if let Some((last, rest)) = peers.split_last_mut() {
                    for link in rest {
                        link.connection.send(frame.clone());
                    }
                    last.connection.send(frame);
                }
            }
            RoleState::Client { server, .. } => {
                if let Some(link) = server {
                    link.connection.send(frame);
                }
            }
        }
    }

    pub fn send_to(&mut self, peer: PeerId, frame: Vec<u8>) -> Result<(), SessionError> {
        let link = self.link_mut(peer).ok_or(SessionError::UnknownPeer(peer))?;
        link.connection.send(frame);
        Ok(())
    }

    /// Hosts poll their peers round-robin.
    pub fn receive(&mut self) -> Option<(PeerId, Vec<u8>)> {
        match &mut self.state {
            RoleState::Undefined => None,
            RoleState::Host {
                peers,
                next_receive,
                ..
            } => {
                let count = peers.len();
                for offset in 0..count {
                    let index = (*next_receive + offset) % count;
                    let link = &mut peers[index];
                    if let Some(frame) = link.connection.try_receive() {
                        *next_receive = (index + 1) % count;
                        return Some((link.id, frame));
                    }
                }
                None
            }
            RoleState::Client { server, .. } => {
                let link = server.as_mut()?;
                link.connection.try_receive().map(|frame| (link.id, frame))
            }
        }
    }

    pub fn receive_from(&mut self, peer: PeerId) -> Result<Option<Vec<u8>>, SessionError> {
        let link = self.link_mut(peer).ok_or(SessionError::UnknownPeer(peer))?;
        Ok(link.connection.try_receive())
    }

    pub fn disconnect(&mut self, peer: PeerId) -> Result<(), SessionError> {
        let mut link = match &mut self.state {
            RoleState::Host {
                peers,
                next_receive,
                ..
            } => {
                let index = peers
                    .iter()
                    .position(|link| link.id == peer)
                    .ok_or(SessionError::UnknownPeer(peer))?;
                let link = peers.remove(index);
                if *next_receive >= peers.len() {
                    *next_receive = 0;
                }
                link
            }
            RoleState::Client { server, joined } => {
                let link = server
                    .take_if(|link| link.id == peer)
                    .ok_or(SessionError::UnknownPeer(peer))?;
                *joined = false;
                link
            }
            RoleState::Undefined => return Err(SessionError::UnknownPeer(peer)),
        };

        link.connection.close();
        log::info!("Disconnected peer {}", peer);
        self.events.push_back(PeerEvent::Left(peer));
        Ok(())
    }

    pub fn close(&mut self) {
        let (links, announce): (Vec<PeerLink>, bool) = match &mut self.state {
            RoleState::Undefined => (Vec::new(), false),
            RoleState::Host {
                peers,
                next_receive,
                ..
            } => {
                *next_receive = 0;
                (peers.drain(..).collect(), true)
            }
            RoleState::Client { server, joined } => {
                (server.take().into_iter().collect(), std::mem::take(joined))
            }
        };

        for mut link in links {
            link.connection.close();
            if announce {
                self.events.push_back(PeerEvent::Left(link.id));
            }
        }
    }

    pub fn has_shared_data(&self, key: &str) -> bool {
        self.shared_data.contains_key(key)
    }

    pub fn shared_data(&self, key: &str) -> Result<&[u8], SessionError> {
        self.shared_data
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| SessionError::SharedDataNotFound(key.to_string()))
    }

    pub fn set_shared_data(&mut self, key: &str, data: Vec<u8>) {
        self.dirty_keys.insert(key.to_string());
        self.shared_data.insert(key.to_string(), data);
    }

    pub fn shared_keys(&self) -> impl Iterator<Item = &str> {
        self.shared_data.keys().map(String::as_str)
    }

    pub fn set_shared_value<T>(&mut self, key: &str, value: &T) -> Result<(), SessionError>
    where
        T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, rancor::Error>>,
    {
        let bytes = rkyv::to_bytes::<rancor::Error>(value).map_err(SessionError::SharedData)?;
        self.set_shared_data(key, bytes.into_vec());
        Ok(())
    }

    pub fn shared_value<T>(&self, key: &str) -> Result<T, SessionError>
    where
        T: Archive,
        T::Archived: for<'a> CheckBytes<HighValidator<'a, rancor::Error>>
            + Deserialize<T, Strategy<Pool, rancor::Error>>,
    {
        decode_aligned(self.shared_data(key)?).map_err(SessionError::SharedData)
    }

    pub(crate) fn take_shared_data_changes(&mut self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut self.dirty_keys)
            .into_iter()
            .filter_map(|key| {
                let data = self.shared_data.get(&key)?.clone();
                Some((key, data))
            })
            .collect()
    }

    pub(crate) fn shared_data_entries(&self) -> Vec<(String, Vec<u8>)> {
        self.shared_data
            .iter()
            .map(|(key, data)| (key.clone(), data.clone()))
            .collect()
    }

    /// Stores a value received from the host without marking it for
    /// re-broadcast.
    pub(crate) fn apply_remote_shared_data(&mut self, key: String, data: Vec<u8>) {
        self.shared_data.insert(key, data);
    }

    fn link(&self, peer: PeerId) -> Option<&PeerLink> {
        match &self.state {
            RoleState::Undefined => None,
            RoleState::Host { peers, .. } => peers.iter().find(|link| link.id == peer),
            RoleState::Client { server, .. } => server.as_ref().filter(|link| link.id == peer),
        }
    }

    fn link_mut(&mut self, peer: PeerId) -> Option<&mut PeerLink> {
        match &mut self.state {
            RoleState::Undefined => None,
            RoleState::Host { peers, .. } => peers.iter_mut().find(|link| link.id == peer),
            RoleState::Client { server, .. } => server.as_mut().filter(|link| link.id == peer),
        }
    }
}

fn admit(
    peers: &mut Vec<PeerLink>,
    mut connection: Box<dyn Connection>,
    events: &mut VecDeque<PeerEvent>,
) {
    let Some(id) = (1..=PeerId::MAX).find(|id| peers.iter().all(|link| link.id != *id)) else {
        log::warn!("No free peer id, refusing connection");
        connection.close();
        return;
    };
    log::info!("Peer {} joined", id);
    peers.push(PeerLink { id, connection });
    events.push_back(PeerEvent::Joined(id));
}

impl<S: TransportService> Drop for Session<S> {
    fn drop(&mut self) {
        if self.is_host() {
            self.transport.set_accepting_connections(false);
        }
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NullTransport;

    fn session() -> Session<NullTransport> {
        Session::new(NullTransport::new(), SessionConfig::default())
    }

    #[test]
    fn test_starts_undefined() {
        let session = session();

        assert_eq!(session.role(), SessionRole::Undefined);
        assert_eq!(session.status(), ConnectionStatus::Undefined);
        assert_eq!(session.connection_count(), 0);
    }

    #[test]
    fn test_host_is_always_open() {
        let mut session = session();
        session.host(4000);
        session.update();

        assert_eq!(session.role(), SessionRole::Host);
        assert_eq!(session.status(), ConnectionStatus::Open);
        assert_eq!(session.host_port(), Some(4000));
        assert!(session.transport().is_accepting());
    }

    #[test]
    fn test_host_with_one_seat_never_accepts() {
        let mut session = session();
        session.set_max_clients(1);
        session.host(4000);
        session.update();

        assert!(!session.transport().is_accepting());
    }

    #[test]
    fn test_update_restores_accept_mode_changed_behind_its_back() {
        let mut session = session();
        session.host(4000);
        session.update();

        session.transport_mut().set_accepting_connections(false);
        session.update();

        assert!(session.transport().is_accepting());
    }

    #[test]
    fn test_join_unreachable_reports_closed() {
        let mut session = session();
        session.join("127.0.0.1", 1);

        assert_eq!(session.status(), ConnectionStatus::Closed);
        session.update();
        assert_eq!(session.status(), ConnectionStatus::Closed);
        assert_eq!(session.connection_count(), 0);
        assert_eq!(session.drain_peer_events().count(), 0);
    }

    #[test]
    #[should_panic(expected = "session role already set")]
    fn test_host_twice_panics() {
        let mut session = session();
        session.host(4000);
        session.host(4001);
    }

    #[test]
    #[should_panic(expected = "session role already set")]
    fn test_join_after_host_panics() {
        let mut session = session();
        session.host(4000);
        session.join("127.0.0.1", 4000);
    }

    #[test]
    fn test_shared_data() {
        let mut session = session();

        assert!(!session.has_shared_data("map"));
        assert!(matches!(
            session.shared_data("map"),
            Err(SessionError::SharedDataNotFound(key)) if key == "map"
        ));

        session.set_shared_data("map", b"arena".to_vec());
        assert!(session.has_shared_data("map"));
        assert_eq!(session.shared_data("map").unwrap(), b"arena");

        session.set_shared_data("map", b"docks".to_vec());
        assert_eq!(session.shared_data("map").unwrap(), b"docks");
    }

    #[test]
    fn test_typed_shared_value() {
        let mut session = session();

        session.set_shared_value("round", &7u32).unwrap();
        assert_eq!(session.shared_value::<u32>("round").unwrap(), 7);
        assert!(session.shared_value::<u32>("missing").is_err());
    }

    #[test]
    fn test_shared_changes_are_taken_once() {
        let mut session = session();
        session.set_shared_data("a", vec![1]);
        session.set_shared_data("b", vec![2]);
        session.set_shared_data("a", vec![3]);

        let changes = session.take_shared_data_changes();
        assert_eq!(
            changes,
            vec![("a".to_string(), vec![3]), ("b".to_string(), vec![2])]
        );
        assert!(session.take_shared_data_changes().is_empty());

        session.apply_remote_shared_data("c".to_string(), vec![4]);
        assert!(session.take_shared_data_changes().is_empty());
        assert_eq!(session.shared_data_entries().len(), 3);
    }

    #[test]
    fn test_unknown_peer() {
        let mut session = session();
        session.host(4000);

        assert!(matches!(
            session.send_to(3, vec![1]),
            Err(SessionError::UnknownPeer(3))
        ));
        assert!(matches!(
            session.disconnect(3),
            Err(SessionError::UnknownPeer(3))
        ));
        assert!(session.receive().is_none());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = session();
        session.host(4000);

        session.close();
        session.close();

        assert_eq!(session.connection_count(), 0);
        assert_eq!(session.status(), ConnectionStatus::Open);
    }
}
