pub mod database;
pub mod index_storage;
pub mod packet;
pub mod paths;
pub mod stamps;
pub mod versions;

pub use database::{Database, LAYOUT_VERSION};
pub use index_storage::IndexStorage;
pub use packet::{Packet, PacketError};
pub use paths::PathRegistry;
pub use stamps::{Stamp, StampStore};
pub use versions::DefinitionVersionStore;
