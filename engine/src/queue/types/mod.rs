//! Type definitions for the job store write layer.
//!
//! Module organization:
//! - `time.rs` - Timestamps and name type aliases

mod time;

pub use time::{expire_at, now_ms, queue_name, QueueName};
