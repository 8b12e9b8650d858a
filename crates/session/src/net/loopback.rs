//! In-process transport that routes frames between services without any I/O.
//!
//! A [`LoopbackNetwork`] is a registry of listeners keyed by address and port.
//! Services created from the same network can reach each other; frames are
//! delivered reliably and in order.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use super::connection::{Connection, ConnectionStatus, TransportService};

type ListenerKey = (String, u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipeState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Host,
}

#[derive(Debug)]
struct Pipe {
    state: PipeState,
    to_host: VecDeque<Vec<u8>>,
    to_client: VecDeque<Vec<u8>>,
}

impl Pipe {
    fn new(state: PipeState) -> Self {
        Self {
            state,
            to_host: VecDeque::new(),
            to_client: VecDeque::new(),
        }
    }
}

pub struct LoopbackConnection {
    pipe: Arc<Mutex<Pipe>>,
    side: Side,
}

impl LoopbackConnection {
    fn new(pipe: Arc<Mutex<Pipe>>, side: Side) -> Self {
        Self { pipe, side }
    }
}

impl Connection for LoopbackConnection {
    fn status(&self) -> ConnectionStatus {
        match self.pipe.lock().state {
            PipeState::Connecting => ConnectionStatus::Connecting,
            PipeState::Open => ConnectionStatus::Open,
            PipeState::Closed => ConnectionStatus::Closed,
        }
    }

    fn send(&mut self, frame: Vec<u8>) {
        let mut pipe = self.pipe.lock();
        if pipe.state == PipeState::Closed {
            return;
        }
        match self.side {
            Side::Client => pipe.to_host.push_back(frame),
            Side::Host => pipe.to_client.push_back(frame),
        }
    }

    fn try_receive(&mut self) -> Option<Vec<u8>> {
        let mut pipe = self.pipe.lock();
        match self.side {
            Side::Client => pipe.to_client.pop_front(),
            Side::Host => pipe.to_host.pop_front(),
        }
    }

    fn close(&mut self) {
        self.pipe.lock().state = PipeState::Closed;
    }
}

impl Drop for LoopbackConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, Default)]
struct Listener {
    accepting: bool,
    pending: VecDeque<Arc<Mutex<Pipe>>>,
}

impl Listener {
    fn refuse_pending(&mut self) {
        for pipe in self.pending.drain(..) {
            pipe.lock().state = PipeState::Closed;
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    listeners: HashMap<ListenerKey, Arc<Mutex<Listener>>>,
}

#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    registry: Arc<Mutex<Registry>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A service listening on `address:port`. Replaces any previous listener
    /// registered under the same key.
    pub fn listen(&self, address: &str, port: u16) -> LoopbackService {
        let key = (address.to_string(), port);
        let listener = Arc::new(Mutex::new(Listener::default()));
        self.registry
            .lock()
            .listeners
            .insert(key.clone(), Arc::clone(&listener));

        LoopbackService {
            network: self.clone(),
            listener: Some((key, listener)),
        }
    }

    /// A service that can only open outbound connections.
    pub fn client(&self) -> LoopbackService {
        LoopbackService {
            network: self.clone(),
            listener: None,
        }
    }

    fn find(&self, address: &str, port: u16) -> Option<Arc<Mutex<Listener>>> {
        self.registry
            .lock()
            .listeners
            .get(&(address.to_string(), port))
            .cloned()
    }
}

pub struct LoopbackService {
    network: LoopbackNetwork,
    listener: Option<(ListenerKey, Arc<Mutex<Listener>>)>,
}

impl LoopbackService {
    pub fn is_accepting(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|(_, listener)| listener.lock().accepting)
    }

    pub fn pending_count(&self) -> usize {
        self.listener
            .as_ref()
            .map_or(0, |(_, listener)| listener.lock().pending.len())
    }
}

impl TransportService for LoopbackService {
    fn set_accepting_connections(&mut self, accepting: bool) {
        let Some((_, listener)) = &self.listener else {
            return;
        };
        let mut listener = listener.lock();
        listener.accepting = accepting;
        if !accepting {
            listener.refuse_pending();
        }
    }

    fn try_accept_connection(&mut self) -> Option<Box<dyn Connection>> {
        let (_, listener) = self.listener.as_ref()?;
        let mut listener = listener.lock();
        if !listener.accepting {
            return None;
        }

        while let Some(pipe) = listener.pending.pop_front() {
            let mut state = pipe.lock();
            if state.state == PipeState::Connecting {
                state.state = PipeState::Open;
                drop(state);
                return Some(Box::new(LoopbackConnection::new(pipe, Side::Host)));
            }
        }
        None
    }

    fn connect(&mut self, address: &str, port: u16) -> Box<dyn Connection> {
        let Some(listener) = self.network.find(address, port) else {
            log::debug!("No loopback listener on {}:{}", address, port);
            let pipe = Arc::new(Mutex::new(Pipe::new(PipeState::Closed)));
            return Box::new(LoopbackConnection::new(pipe, Side::Client));
        };

        let mut listener = listener.lock();
        let state = if listener.accepting {
            PipeState::Connecting
        } else {
            PipeState::Closed
        };
        let pipe = Arc::new(Mutex::new(Pipe::new(state)));
        if state == PipeState::Connecting {
            listener.pending.push_back(Arc::clone(&pipe));
        }
        Box::new(LoopbackConnection::new(pipe, Side::Client))
    }
}

impl Drop for LoopbackService {
    fn drop(&mut self) {
        let Some((key, listener)) = self.listener.take() else {
            return;
        };
        listener.lock().refuse_pending();

        let mut registry = self.network.registry.lock();
        if registry
            .listeners
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &listener))
        {
            registry.listeners.remove(&key);
        }
    }
}
