//! objrepo core - in-memory object repository over pluggable storage
//!
//! Domain objects are loaded from a storage backend once, at startup, and
//! then live in typed in-memory tables. This crate provides:
//! - Typed tables with a primary index, lazily declared secondary indexes
//!   and foreign-key indexes that follow every property change
//! - Relationship accessors resolved through those indexes
//! - A single change stream feeding indexes, the backend and the host
//! - A loading gate that refuses mutation until warm-up has completed
//! - The [`Storage`] contract backends implement
//! - The structured logging facility shared with storage adapters

pub mod concurrent_list;
pub mod config;
pub mod entity;
pub mod errors;
pub mod event;
mod foreign;
pub mod logging_facility;
pub mod model;
pub mod repository;
pub mod schedule;
pub mod storage;
pub mod table;
pub mod value;

pub use objrepo_core_types as core_types;

// Re-export commonly used types
pub use concurrent_list::ConcurrentList;
pub use config::{DeletePolicy, RepositoryOptions};
pub use entity::Entity;
pub use errors::{ExError, ExErrorKind, RepositoryError, Result};
pub use event::{ChangeEvent, ChangeKind, ChangeStream, EventChannel, SubscriptionId};
pub use model::{AnyModel, ForeignKey, Model, ModelBase, Property, Reference, Relation};
pub use repository::ObjectRepository;
pub use schedule::SaveScheduler;
pub use storage::{Storage, StorageResult};
pub use table::{Table, WarmUpReport};
pub use value::Value;
