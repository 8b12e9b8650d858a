pub mod config;
pub mod error;
pub mod events;
pub mod net;
pub mod replication;
pub mod session;

pub use config::{DEFAULT_MAX_CLIENTS, LinkConfig, ReplicationConfig, SessionConfig};
pub use error::{SessionError, StoreError, SyncError};
pub use events::{DisconnectReason, SessionEvent};
pub use net::{
    Connection, ConnectionStatus, DEFAULT_PORT, DEFAULT_TICK_RATE, LinkStats, LoopbackNetwork,
    NullTransport, TransportService, UdpTransport,
};
pub use replication::{
    EntityNetworkSession, EntitySnapshot, EntityStore, EntityWorldId, InterestEntry,
    MemoryEntityStore, NetworkEntityId, ReceiveReport, RemotePeer, SendReport,
};
pub use session::{HOST_PEER_ID, PeerEvent, PeerId, Session, SessionRole};
