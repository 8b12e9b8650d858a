//! Transport-facing traits consumed by [`Session`](crate::Session).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    Undefined,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Undefined => "undefined",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closing => "closing",
            ConnectionStatus::Closed => "closed",
        }
    }
}

/// A bidirectional framed link to one remote peer.
///
/// Every operation is non-blocking. Failures are never returned from `send`;
/// they show up as the status moving to [`ConnectionStatus::Closed`].
pub trait Connection: Send {
    fn status(&self) -> ConnectionStatus;

    fn send(&mut self, frame: Vec<u8>);

    /// Yields at most one inbound frame.
    fn try_receive(&mut self) -> Option<Vec<u8>>;

    fn close(&mut self);
}

pub trait TransportService: Send {
    /// Pumps sockets and timers. Called once at the start of every session tick.
    fn update(&mut self) {}

    fn set_accepting_connections(&mut self, accepting: bool);

    fn try_accept_connection(&mut self) -> Option<Box<dyn Connection>>;

    /// Opens an outbound connection. An unreachable remote still yields a
    /// connection; it reports `Closed` once the attempt fails.
    fn connect(&mut self, address: &str, port: u16) -> Box<dyn Connection>;
}

/// A connection that is closed from the start.
#[derive(Debug, Default)]
pub struct ClosedConnection;

impl Connection for ClosedConnection {
    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::Closed
    }

    fn send(&mut self, _frame: Vec<u8>) {}

    fn try_receive(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn close(&mut self) {}
}

/// Transport without a network: it never accepts and every connect fails.
#[derive(Debug, Default)]
pub struct NullTransport {
    accepting: bool,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }
}

impl TransportService for NullTransport {
    fn set_accepting_connections(&mut self, accepting: bool) {
        self.accepting = accepting;
    }

    fn try_accept_connection(&mut self) -> Option<Box<dyn Connection>> {
        None
    }

    fn connect(&mut self, address: &str, port: u16) -> Box<dyn Connection> {
        log::debug!("Null transport refusing connection to {}:{}", address, port);
        Box::new(ClosedConnection)
    }
}
