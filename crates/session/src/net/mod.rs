mod connection;
mod link;
mod loopback;
mod protocol;
mod stats;
mod tracking;
mod udp;

pub use connection::{ClosedConnection, Connection, ConnectionStatus, NullTransport, TransportService};
pub use link::ReliableLink;
pub use loopback::{LoopbackConnection, LoopbackNetwork, LoopbackService};
pub use protocol::{
    DEFAULT_PORT, DEFAULT_TICK_RATE, MAX_FRAGMENT_SIZE, MAX_PACKET_SIZE, PROTOCOL_MAGIC,
    PROTOCOL_VERSION, Packet, PacketError, PacketHeader, PacketType, sequence_greater_than,
};
pub use stats::LinkStats;
pub use tracking::{AckTracker, OrderedReceiver};
pub use udp::{UdpConnection, UdpTransport};
