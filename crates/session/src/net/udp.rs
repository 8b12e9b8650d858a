//! UDP implementation of [`TransportService`].
//!
//! One non-blocking socket serves every connection of a transport; datagrams
//! are routed by remote address. A connection goes through the salt handshake
//! (request, challenge, response, accepted) before frames flow over its
//! [`ReliableLink`].

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::connection::{ClosedConnection, Connection, ConnectionStatus, TransportService};
use super::link::ReliableLink;
use super::protocol::{MAX_PACKET_SIZE, Packet, PacketHeader, PacketType};
use super::stats::{LinkStats, rand_u64};
use crate::config::LinkConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoteState {
    /// Inbound: challenge sent, waiting for the response.
    Challenged { challenge: u64 },
    /// Inbound: handshake complete, waiting for `try_accept_connection`.
    AwaitingAccept,
    /// Outbound: request sent, waiting for the challenge.
    Requesting { client_salt: u64, last_sent: Instant },
    /// Outbound: response sent, waiting for acceptance.
    Responding { combined: u64, last_sent: Instant },
    Open,
    Closed,
}

impl RemoteState {
    fn is_pending_inbound(&self) -> bool {
        matches!(
            self,
            RemoteState::Challenged { .. } | RemoteState::AwaitingAccept
        )
    }

    fn status(&self) -> ConnectionStatus {
        match self {
            RemoteState::Requesting { .. } | RemoteState::Responding { .. } => {
                ConnectionStatus::Connecting
            }
            RemoteState::Open => ConnectionStatus::Open,
            RemoteState::Closed => ConnectionStatus::Closed,
            RemoteState::Challenged { .. } | RemoteState::AwaitingAccept => {
                ConnectionStatus::Connecting
            }
        }
    }
}

#[derive(Debug)]
struct Remote {
    token: u64,
    state: RemoteState,
    link: ReliableLink,
    started: Instant,
    connection_id: u32,
}

impl Remote {
    fn new(token: u64, state: RemoteState, config: &LinkConfig, now: Instant) -> Self {
        Self {
            token,
            state,
            link: ReliableLink::new(config.clone(), now),
            started: now,
            connection_id: 0,
        }
    }
}

struct UdpHub {
    socket: UdpSocket,
    config: LinkConfig,
    accepting: bool,
    remotes: HashMap<SocketAddr, Remote>,
    ready: VecDeque<SocketAddr>,
    outbox: Vec<(SocketAddr, Packet)>,
    recv_buffer: Vec<u8>,
    next_token: u64,
    next_connection_id: u32,
    stats: LinkStats,
}

impl UdpHub {
    fn pump(&mut self, now: Instant) {
        self.receive_all(now);
        self.tick(now);
        self.flush();
    }

    fn receive_all(&mut self, now: Instant) {
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    let packet = match Packet::deserialize(&self.recv_buffer[..size]) {
                        Ok(packet) if packet.header.is_valid() => packet,
                        Ok(_) => continue,
                        Err(e) => {
                            log::debug!("Discarding datagram from {}: {}", addr, e);
                            continue;
                        }
                    };
                    match self.remotes.get_mut(&addr) {
                        Some(remote) => remote.link.record_received(size),
                        None => {
                            self.stats.packets_received += 1;
                            self.stats.bytes_received += size as u64;
                        }
                    }
                    self.dispatch(packet, addr, now);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::debug!("Socket receive error: {}", e);
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, packet: Packet, addr: SocketAddr, now: Instant) {
        match packet.payload {
            PacketType::ConnectionRequest { client_salt } => {
                self.handle_request(addr, client_salt, now);
            }
            PacketType::ConnectionChallenge {
                server_salt,
                challenge,
            } => {
                let Some(remote) = self.remotes.get_mut(&addr) else {
                    return;
                };
                let RemoteState::Requesting { client_salt, .. } = remote.state else {
                    return;
                };
                if challenge != client_salt ^ server_salt {
                    log::warn!("Invalid challenge from {}", addr);
                    return;
                }
                remote.state = RemoteState::Responding {
                    combined: challenge,
                    last_sent: now,
                };
                self.outbox.push((
                    addr,
                    remote.link.control(PacketType::ChallengeResponse {
                        combined_salt: challenge,
                    }),
                ));
            }
            PacketType::ChallengeResponse { combined_salt } => {
                self.handle_response(addr, combined_salt);
            }
            PacketType::ConnectionAccepted { connection_id } => {
                let Some(remote) = self.remotes.get_mut(&addr) else {
                    return;
                };
                if matches!(
                    remote.state,
                    RemoteState::Requesting { .. } | RemoteState::Responding { .. }
                ) {
                    log::info!("Connected to {} (connection {})", addr, connection_id);
                    remote.state = RemoteState::Open;
                    remote.connection_id = connection_id;
                }
            }
            PacketType::ConnectionDenied { reason } => {
                let Some(remote) = self.remotes.get_mut(&addr) else {
                    return;
                };
                if matches!(
                    remote.state,
                    RemoteState::Requesting { .. } | RemoteState::Responding { .. }
                ) {
                    log::warn!("Connection to {} denied: {}", addr, reason);
                    remote.state = RemoteState::Closed;
                }
            }
            PacketType::Disconnect => {
                let Some(remote) = self.remotes.get_mut(&addr) else {
                    return;
                };
                if remote.state.is_pending_inbound() {
                    self.remotes.remove(&addr);
                    self.ready.retain(|a| *a != addr);
                } else if remote.state != RemoteState::Closed {
                    log::info!("Remote {} disconnected", addr);
                    remote.state = RemoteState::Closed;
                }
            }
            payload @ (PacketType::Fragment { .. }
            | PacketType::Ack { .. }
            | PacketType::Ping { .. }
            | PacketType::Pong { .. }) => {
                let Some(remote) = self.remotes.get_mut(&addr) else {
                    return;
                };
                if let RemoteState::Responding { .. } = remote.state {
                    // Acceptance was lost but the host is already talking to us.
                    log::debug!("Implicitly accepted by {}", addr);
                    remote.state = RemoteState::Open;
                }
                if remote.state != RemoteState::Open {
                    return;
                }
                let mut replies = Vec::new();
                remote
                    .link
                    .handle(Packet::new(packet.header, payload), now, &mut replies);
                self.outbox
                    .extend(replies.into_iter().map(|packet| (addr, packet)));
            }
        }
    }

    fn handle_request(&mut self, addr: SocketAddr, client_salt: u64, now: Instant) {
        match self.remotes.get(&addr).map(|remote| remote.state) {
            Some(RemoteState::Challenged { challenge }) => {
                // The challenge was lost; repeat it.
                let packet = Packet::new(
                    PacketHeader::new(0),
                    PacketType::ConnectionChallenge {
                        server_salt: challenge ^ client_salt,
                        challenge,
                    },
                );
                self.outbox.push((addr, packet));
                return;
            }
            Some(RemoteState::Closed) => {
                self.remotes.remove(&addr);
            }
            Some(_) => return,
            None => {}
        }

        if !self.accepting {
            self.deny(addr, "not accepting connections");
            return;
        }

        let pending = self
            .remotes
            .values()
            .filter(|r| r.state.is_pending_inbound())
            .count();
        if pending >= self.config.max_pending {
            self.deny(addr, "too many pending connections");
            return;
        }

        log::debug!("Connection request from {}", addr);
        let server_salt = rand_u64();
        let challenge = client_salt ^ server_salt;
        let token = self.issue_token();
        let remote = Remote::new(
            token,
            RemoteState::Challenged { challenge },
            &self.config,
            now,
        );
        let packet = remote.link.control(PacketType::ConnectionChallenge {
            server_salt,
            challenge,
        });
        self.remotes.insert(addr, remote);
        self.outbox.push((addr, packet));
    }

    fn handle_response(&mut self, addr: SocketAddr, combined_salt: u64) {
        let Some(remote) = self.remotes.get_mut(&addr) else {
            return;
        };
        match remote.state {
            RemoteState::Challenged { challenge } if challenge == combined_salt => {
                remote.state = RemoteState::AwaitingAccept;
                self.ready.push_back(addr);
            }
            RemoteState::Challenged { .. } => {
                log::warn!("Invalid challenge response from {}", addr);
            }
            RemoteState::Open => {
                let packet = remote.link.control(PacketType::ConnectionAccepted {
                    connection_id: remote.connection_id,
                });
                self.outbox.push((addr, packet));
            }
            _ => {}
        }
    }

    fn deny(&mut self, addr: SocketAddr, reason: &str) {
        log::debug!("Denying connection from {}: {}", addr, reason);
        let packet = Packet::new(
            PacketHeader::new(0),
            PacketType::ConnectionDenied {
                reason: reason.to_string(),
            },
        );
        self.outbox.push((addr, packet));
    }

    fn tick(&mut self, now: Instant) {
        let connect_timeout = self.config.connect_timeout();
        let retry = self.config.handshake_retry();
        let mut stale = Vec::new();

        for (addr, remote) in &mut self.remotes {
            match remote.state {
                RemoteState::Requesting { client_salt, last_sent } => {
                    if now.duration_since(remote.started) > connect_timeout {
                        log::warn!("Connection to {} timed out", addr);
                        remote.state = RemoteState::Closed;
                    } else if now.duration_since(last_sent) >= retry {
                        remote.state = RemoteState::Requesting {
                            client_salt,
                            last_sent: now,
                        };
                        self.outbox.push((
                            *addr,
                            remote
                                .link
                                .control(PacketType::ConnectionRequest { client_salt }),
                        ));
                    }
                }
                RemoteState::Responding { combined, last_sent } => {
                    if now.duration_since(remote.started) > connect_timeout {
                        log::warn!("Connection to {} timed out", addr);
                        remote.state = RemoteState::Closed;
                    } else if now.duration_since(last_sent) >= retry {
                        remote.state = RemoteState::Responding {
                            combined,
                            last_sent: now,
                        };
                        self.outbox.push((
                            *addr,
                            remote.link.control(PacketType::ChallengeResponse {
                                combined_salt: combined,
                            }),
                        ));
                    }
                }
                RemoteState::Challenged { .. } | RemoteState::AwaitingAccept => {
                    if now.duration_since(remote.started) > connect_timeout {
                        stale.push(*addr);
                    }
                }
                RemoteState::Open => {
                    if remote.link.is_timed_out(now) {
                        log::info!("Connection to {} timed out", addr);
                        remote.state = RemoteState::Closed;
                    } else if remote.link.is_corrupted() {
                        log::warn!("Closing corrupted link to {}", addr);
                        remote.state = RemoteState::Closed;
                        self.outbox
                            .push((*addr, remote.link.control(PacketType::Disconnect)));
                    } else {
                        let mut packets = Vec::new();
                        remote.link.poll(now, &mut packets);
                        self.outbox
                            .extend(packets.into_iter().map(|packet| (*addr, packet)));
                    }
                }
                RemoteState::Closed => {}
            }
        }

        for addr in stale {
            log::debug!("Dropping stale handshake from {}", addr);
            self.remotes.remove(&addr);
            self.ready.retain(|a| *a != addr);
        }
    }

    fn flush(&mut self) {
        for (addr, packet) in self.outbox.drain(..) {
            let data = match packet.serialize() {
                Ok(data) => data,
                Err(e) => {
                    log::error!("Failed to encode packet for {}: {}", addr, e);
                    continue;
                }
            };
            match self.socket.send_to(&data, addr) {
                Ok(bytes) => match self.remotes.get_mut(&addr) {
                    Some(remote) => remote.link.record_sent(bytes),
                    None => {
                        self.stats.packets_sent += 1;
                        self.stats.bytes_sent += bytes as u64;
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    log::debug!("Socket buffer full, dropping packet for {}", addr);
                }
                Err(e) => log::debug!("Failed to send to {}: {}", addr, e),
            }
        }
    }

    fn accept(&mut self, now: Instant) -> Option<(SocketAddr, u64)> {
        while let Some(addr) = self.ready.pop_front() {
            let Some(remote) = self.remotes.get_mut(&addr) else {
                continue;
            };
            if remote.state != RemoteState::AwaitingAccept {
                continue;
            }

            self.next_connection_id = self.next_connection_id.wrapping_add(1);
            remote.state = RemoteState::Open;
            remote.connection_id = self.next_connection_id;
            remote.link = ReliableLink::new(self.config.clone(), now);
            let packet = remote.link.control(PacketType::ConnectionAccepted {
                connection_id: remote.connection_id,
            });
            let token = remote.token;
            self.outbox.push((addr, packet));
            self.flush();

            log::info!("Accepted connection from {}", addr);
            return Some((addr, token));
        }
        None
    }

    fn set_accepting(&mut self, accepting: bool) {
        if self.accepting == accepting {
            return;
        }
        self.accepting = accepting;
        if accepting {
            return;
        }

        let pending: Vec<SocketAddr> = self
            .remotes
            .iter()
            .filter(|(_, r)| r.state.is_pending_inbound())
            .map(|(addr, _)| *addr)
            .collect();
        for addr in pending {
            self.remotes.remove(&addr);
            self.deny(addr, "server full");
        }
        self.ready.clear();
        self.flush();
    }

    fn connect(&mut self, addr: SocketAddr, now: Instant) -> Option<u64> {
        if let Some(existing) = self.remotes.get(&addr) {
            if existing.state != RemoteState::Closed {
                log::warn!("Already connected or connecting to {}", addr);
                return None;
            }
            self.remotes.remove(&addr);
        }

        let client_salt = rand_u64();
        let token = self.issue_token();
        let remote = Remote::new(
            token,
            RemoteState::Requesting {
                client_salt,
                last_sent: now,
            },
            &self.config,
            now,
        );
        let packet = remote
            .link
            .control(PacketType::ConnectionRequest { client_salt });
        self.remotes.insert(addr, remote);
        self.outbox.push((addr, packet));
        self.flush();

        log::info!("Connecting to {}", addr);
        Some(token)
    }

    fn issue_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn remote(&self, addr: &SocketAddr, token: u64) -> Option<&Remote> {
        self.remotes.get(addr).filter(|r| r.token == token)
    }

    fn remote_mut(&mut self, addr: &SocketAddr, token: u64) -> Option<&mut Remote> {
        self.remotes.get_mut(addr).filter(|r| r.token == token)
    }
}

pub struct UdpTransport {
    hub: Arc<Mutex<UdpHub>>,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A, config: LinkConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        let hub = UdpHub {
            socket,
            config,
            accepting: false,
            remotes: HashMap::new(),
            ready: VecDeque::new(),
            outbox: Vec::new(),
            recv_buffer: vec![0u8; MAX_PACKET_SIZE],
            next_token: 0,
            next_connection_id: 0,
            stats: LinkStats::default(),
        };

        Ok(Self {
            hub: Arc::new(Mutex::new(hub)),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_accepting(&self) -> bool {
        self.hub.lock().accepting
    }

    /// Totals across the transport, including handshake traffic.
    pub fn stats(&self) -> LinkStats {
        let hub = self.hub.lock();
        let mut stats = hub.stats.clone();
        for remote in hub.remotes.values() {
            stats.merge(remote.link.stats());
        }
        stats
    }
}

impl TransportService for UdpTransport {
    fn update(&mut self) {
        self.hub.lock().pump(Instant::now());
    }

    fn set_accepting_connections(&mut self, accepting: bool) {
        self.hub.lock().set_accepting(accepting);
    }

    fn try_accept_connection(&mut self) -> Option<Box<dyn Connection>> {
        let mut hub = self.hub.lock();
        if !hub.accepting {
            return None;
        }
        let (addr, token) = hub.accept(Instant::now())?;
        drop(hub);

        Some(Box::new(UdpConnection {
            hub: Arc::clone(&self.hub),
            addr,
            token,
        }))
    }

    fn connect(&mut self, address: &str, port: u16) -> Box<dyn Connection> {
        let addr = match (address, port).to_socket_addrs() {
            Ok(mut addrs) => addrs.next(),
            Err(e) => {
                log::warn!("Failed to resolve {}:{}: {}", address, port, e);
                None
            }
        };
        let Some(addr) = addr else {
            return Box::new(ClosedConnection);
        };

        let Some(token) = self.hub.lock().connect(addr, Instant::now()) else {
            return Box::new(ClosedConnection);
        };

        Box::new(UdpConnection {
            hub: Arc::clone(&self.hub),
            addr,
            token,
        })
    }
}

pub struct UdpConnection {
    hub: Arc<Mutex<UdpHub>>,
    addr: SocketAddr,
    token: u64,
}

impl UdpConnection {
    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stats(&self) -> Option<LinkStats> {
        let hub = self.hub.lock();
        hub.remote(&self.addr, self.token)
            .map(|remote| remote.link.stats().clone())
    }
}

impl Connection for UdpConnection {
    fn status(&self) -> ConnectionStatus {
        let hub = self.hub.lock();
        hub.remote(&self.addr, self.token)
            .map_or(ConnectionStatus::Closed, |remote| remote.state.status())
    }

    fn send(&mut self, frame: Vec<u8>) {
        let mut hub = self.hub.lock();
        let now = Instant::now();
        let addr = self.addr;
        let Some(remote) = hub.remote_mut(&addr, self.token) else {
            return;
        };
        if remote.state == RemoteState::Closed {
            return;
        }
        remote.link.queue_frame(&frame);
        if remote.state == RemoteState::Open {
            let mut packets = Vec::new();
            remote.link.poll(now, &mut packets);
            hub.outbox
                .extend(packets.into_iter().map(|packet| (addr, packet)));
            hub.flush();
        }
    }

    fn try_receive(&mut self) -> Option<Vec<u8>> {
        let mut hub = self.hub.lock();
        hub.remote_mut(&self.addr, self.token)?.link.take_frame()
    }

    fn close(&mut self) {
        let mut hub = self.hub.lock();
        let Some(remote) = hub.remote(&self.addr, self.token) else {
            return;
        };
        if remote.state != RemoteState::Closed {
            let packet = remote.link.control(PacketType::Disconnect);
            hub.outbox.push((self.addr, packet));
        }
        if let Some(remote) = hub.remotes.remove(&self.addr) {
            hub.stats.merge(remote.link.stats());
        }
        hub.flush();
    }
}

impl Drop for UdpConnection {
    fn drop(&mut self) {
        self.close();
    }
}
