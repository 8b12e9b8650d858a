use std::io;
use std::time::{Duration, Instant};

use tether::{
    EntityNetworkSession, HOST_PEER_ID, Session, SessionConfig, SessionEvent, UdpTransport,
};

use crate::config::HostConfig;
use crate::world::DemoWorld;

const TICK_RATE_KEY: &str = "tick_rate";

pub struct HostApp {
    node: EntityNetworkSession<UdpTransport>,
    world: DemoWorld,
    config: HostConfig,
    tick: u64,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    last_report: Instant,
}

impl HostApp {
    pub fn new(config: HostConfig) -> io::Result<Self> {
        let bind_port = if config.join.is_some() { 0 } else { config.port };
        let transport = UdpTransport::bind((config.bind.as_str(), bind_port), config.link.clone())?;
        log::info!("Bound to {}", transport.local_addr());

        let mut session = Session::new(
            transport,
            SessionConfig {
                max_clients: config.max_clients,
            },
        );
        match &config.join {
            Some(address) => session.join(address, config.port),
            None => {
                session.host(config.port);
                if let Err(e) = session.set_shared_value(TICK_RATE_KEY, &config.tick_rate) {
                    log::warn!("Failed to publish tick rate: {}", e);
                }
            }
        }

        let mut world = DemoWorld::new();
        world.seed(config.entities);

        let now = Instant::now();
        Ok(Self {
            node: EntityNetworkSession::new(session, config.replication.clone()),
            world,
            tick: 0,
            tick_duration: config.tick_duration(),
            last_tick_time: now,
            accumulator: Duration::ZERO,
            last_report: now,
            config,
        })
    }

    pub fn run(&mut self) {
        let start = Instant::now();
        let deadline = self.config.duration();

        while deadline.is_none_or(|limit| start.elapsed() < limit) {
            self.tick_once();
            if self.node.session().role() == tether::SessionRole::Client
                && self.node.session().status() == tether::ConnectionStatus::Closed
            {
                log::warn!("Connection to host lost, stopping");
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        self.shutdown();
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        self.accumulator += now - self.last_tick_time;
        self.last_tick_time = now;

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.step(self.tick_duration);
        }
    }

    fn step(&mut self, dt: Duration) {
        self.node.update(&mut self.world);
        self.log_events();

        self.world.simulate(dt.as_secs_f32());

        let interest = self.node.interest_for(&self.world.ids());
        self.node
            .send_entities(dt, &self.world, |_| interest.clone());

        self.tick += 1;
        if self.last_report.elapsed() >= self.config.stats_interval() {
            self.last_report = Instant::now();
            self.report();
        }
    }

    fn log_events(&mut self) {
        let events: Vec<SessionEvent> = self.node.drain_events().collect();
        for event in events {
            match event {
                SessionEvent::PeerConnected { peer } if peer == HOST_PEER_ID => {
                    log::info!("Joined host");
                }
                SessionEvent::PeerConnected { peer } => {
                    log::info!("Peer {} connected", peer);
                }
                SessionEvent::PeerDisconnected {
                    peer,
                    reason,
                    entities_removed,
                } => {
                    log::info!(
                        "Peer {} {} ({} entities removed)",
                        peer,
                        reason.as_str(),
                        entities_removed
                    );
                }
                SessionEvent::ProtocolViolation { peer, error } => {
                    log::warn!("Peer {} sent bad data: {}", peer, error);
                }
                SessionEvent::SharedDataChanged { key } if key == TICK_RATE_KEY => {
                    match self.node.session().shared_value::<u32>(TICK_RATE_KEY) {
                        Ok(rate) if rate != self.config.tick_rate => log::warn!(
                            "Host ticks at {} Hz, local tick rate is {} Hz",
                            rate,
                            self.config.tick_rate
                        ),
                        Ok(_) => {}
                        Err(e) => log::warn!("Unreadable tick rate from host: {}", e),
                    }
                }
                SessionEvent::SharedDataChanged { key } => {
                    log::debug!("Shared data '{}' changed", key);
                }
            }
        }
    }

    fn report(&self) {
        let stats = self.node.session().transport().stats();
        log::info!(
            "tick {} | {} peers | {} entities ({} local) | sent {} pkts / {} B, recv {} pkts / {} B, resent {}",
            self.tick,
            self.node.peer_ids().count(),
            self.world.entity_count(),
            self.world.local_count(),
            stats.packets_sent,
            stats.bytes_sent,
            stats.packets_received,
            stats.bytes_received,
            stats.packets_resent
        );
    }

    pub fn shutdown(&mut self) {
        log::info!("Shutting down after {} ticks", self.tick);
        self.node.close(&mut self.world);
    }
}
