//! Queue module - write-side persistence for the job store.
//!
//! ## Module Organization
//!
//! - `types/` - Timestamps and name type aliases
//! - `storage.rs` - Queue storage provider trait and per-queue routing
//! - `sqlite/` - SQLite persistence: write batches, registration cache,
//!   migrations and read-side helpers

pub mod sqlite;
pub mod storage;
pub mod types;

pub use sqlite::{BatchError, SqliteConfig, SqliteStorage, WriteBatch, WriteBatchOptions};
pub use storage::{JobQueue, QueueProviders};
