//! objrepo store - storage adapters for the object repository
//!
//! Provides:
//! - `MemoryStorage`, an in-process backend with buffered, batched flushes
//! - Store-specific `ExError` helpers

pub mod errors;
pub mod memory;

// Re-export key types
pub use errors::Result;
pub use memory::{MemoryStorage, MemoryStorageOptions, RecordKey, WriteCheck, WriteOp};
