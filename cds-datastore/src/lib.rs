//! Storage node chunk engine: append-only superblocks plus an in-memory
//! index, exposing the `put`/`get`/`head`/`delete`/`probe`/`health`
//! operations a storage node serves over HTTP.

pub mod index;
pub mod store;
pub mod superblock;

pub use index::{ChunkIndex, IndexEntry};
pub use store::ChunkStore;
pub use superblock::SuperblockSet;
