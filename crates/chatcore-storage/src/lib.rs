//! SQLite-backed persistence for the Message Store and Resumable Stream Log.

pub mod error;
pub mod model;
pub mod storage;

pub use error::{Result, StorageError};
pub use model::{StoredChunk, StreamMetadataRow, StreamStatus};
pub use storage::Storage;
