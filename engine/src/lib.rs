//! jobstore - write batching and atomic commit for a SQLite-backed job store.
//!
//! A [`queue::WriteBatch`] collects job state transitions, counters, sets,
//! lists, hashes and queue registrations, then commits them as a single
//! serializable unit on the caller's connection.

pub mod protocol;
pub mod queue;
