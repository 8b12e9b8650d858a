mod entity;
mod id_pool;
mod message;
mod network;
mod peer;
mod store;

pub(crate) use entity::decode_aligned;
pub use entity::{EntitySnapshot, EntityStore, EntityWorldId, InterestEntry, NetworkEntityId};
pub use id_pool::{NETWORK_ID_SPACE, NetworkIdPool};
pub use message::{BatchReader, EntityMessage, HEADER_LEN, encode_batch};
pub use network::{Channel, EntityNetworkSession};
pub use peer::{ReceiveReport, RemotePeer, SendReport};
pub use store::MemoryEntityStore;
