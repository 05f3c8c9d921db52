//! Durable-store implementations behind the `bridge-core` contracts.

pub mod blob;
pub mod memory;
pub mod sqlite;

pub use blob::FsBlobStore;
pub use memory::{MemoryBlobStore, MemoryStore};
pub use sqlite::SqliteBridgeStore;
