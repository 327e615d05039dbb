//! Write batch for SQLite persistence.
//!
//! Mutations are queued as [`Command`]s and applied in one serializable
//! atomic unit on commit. Either every command takes effect or none does.
//!
//! The unit is bound to the caller's connection. On a connection in
//! autocommit mode the batch opens its own `BEGIN IMMEDIATE` transaction.
//! Inside an ambient transaction it nests under a savepoint instead, so the
//! outer unit stays the caller's to finish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, DatabaseName, Transaction, TransactionBehavior};
use tracing::{debug, warn};

use super::commands::{ApplyContext, Command, KeyedTable, NewState};
use super::error::BatchError;
use super::fault::{FaultClassifier, SqliteFaultClassifier};
use super::queue_cache::QueueRegistrationCache;
use crate::protocol::JobState;
use crate::queue::storage::QueueProviders;
use crate::queue::types::{now_ms, queue_name};

/// Unique savepoint names, in case batches nest inside each other.
static SAVEPOINT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Configuration for write batches.
#[derive(Debug, Clone, Copy)]
pub struct WriteBatchOptions {
    /// Skip the queue registration upsert for queues already seen (default: true)
    pub queue_cache_enabled: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            queue_cache_enabled: true,
        }
    }
}

impl WriteBatchOptions {
    /// Create options from environment variables.
    ///
    /// - `QUEUE_CACHE_ENABLED`: `true`/`false`/`1`/`0` (default: true)
    pub fn from_env() -> Self {
        let queue_cache_enabled = std::env::var("QUEUE_CACHE_ENABLED")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(true);
        Self {
            queue_cache_enabled,
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Lifecycle of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Committing,
    Committed,
    Aborted,
}

/// One logical unit of work against the store.
///
/// Mutation calls only queue commands. `commit` consumes the batch, so a
/// batch is applied at most once.
pub struct WriteBatch<'c> {
    conn: &'c Connection,
    commands: Vec<Command>,
    providers: Arc<QueueProviders>,
    queue_cache: Arc<QueueRegistrationCache>,
    classifier: Arc<dyn FaultClassifier>,
    options: WriteBatchOptions,
    state: BatchState,
}

impl<'c> WriteBatch<'c> {
    /// Create a batch bound to `conn`.
    ///
    /// Fails before anything is queued if the connection cannot write.
    pub fn new(
        conn: &'c Connection,
        providers: Arc<QueueProviders>,
        queue_cache: Arc<QueueRegistrationCache>,
    ) -> Result<Self, BatchError> {
        if conn.is_readonly(DatabaseName::Main)? {
            return Err(BatchError::ReadOnlyConnection);
        }
        Ok(Self {
            conn,
            commands: Vec::new(),
            providers,
            queue_cache,
            classifier: Arc::new(SqliteFaultClassifier),
            options: WriteBatchOptions::default(),
            state: BatchState::Pending,
        })
    }

    pub fn with_options(mut self, options: WriteBatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the storage fault classifier used for conflict detection.
    pub fn with_fault_classifier(mut self, classifier: Arc<dyn FaultClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Pending commands in the order they will be applied.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Append a command. Nothing touches storage until [`WriteBatch::commit`].
    #[inline]
    pub fn enqueue(&mut self, command: Command) {
        self.commands.push(command);
    }

    // ============== Job Operations ==============

    pub fn expire_job(&mut self, job_id: u64, ttl: Duration) {
        self.enqueue(Command::ExpireJob { job_id, ttl });
    }

    pub fn persist_job(&mut self, job_id: u64) {
        self.enqueue(Command::PersistJob { job_id });
    }

    /// Append `state` to the job's history and make it the current state.
    pub fn set_job_state<S: JobState + ?Sized>(&mut self, job_id: u64, state: &S) {
        self.enqueue(Command::SetJobState {
            job_id,
            state: NewState::capture(state),
        });
    }

    /// Append `state` to the job's history without changing the current state.
    pub fn add_job_state<S: JobState + ?Sized>(&mut self, job_id: u64, state: &S) {
        self.enqueue(Command::AddJobState {
            job_id,
            state: NewState::capture(state),
        });
    }

    /// Enqueue a job, registering its queue first unless already known.
    pub fn add_to_queue(&mut self, queue: &str, job_id: u64) {
        let queue_type = self.providers.get(queue).queue_type();
        let register =
            !(self.options.queue_cache_enabled && self.queue_cache.contains(queue_type, queue));
        let command = Command::AddToQueue {
            queue: queue_name(queue),
            queue_type: queue_name(queue_type),
            job_id,
            register,
        };
        self.enqueue(command);
    }

    // ============== Counters ==============

    pub fn increment_counter(&mut self, key: &str) {
        self.append_counter(key, 1, None);
    }

    pub fn increment_counter_expiring(&mut self, key: &str, ttl: Duration) {
        self.append_counter(key, 1, Some(ttl));
    }

    pub fn decrement_counter(&mut self, key: &str) {
        self.append_counter(key, -1, None);
    }

    pub fn decrement_counter_expiring(&mut self, key: &str, ttl: Duration) {
        self.append_counter(key, -1, Some(ttl));
    }

    fn append_counter(&mut self, key: &str, delta: i64, ttl: Option<Duration>) {
        self.enqueue(Command::AppendCounter {
            key: key.to_string(),
            delta,
            ttl,
        });
    }

    // ============== Sets ==============

    pub fn add_to_set(&mut self, key: &str, value: &str) {
        self.add_to_set_with_score(key, value, 0.0);
    }

    pub fn add_to_set_with_score(&mut self, key: &str, value: &str, score: f64) {
        self.enqueue(Command::AddToSet {
            key: key.to_string(),
            value: value.to_string(),
            score,
        });
    }

    /// Add several values with score 0.0. Values already present keep their score.
    pub fn add_range_to_set<I, V>(&mut self, key: &str, values: I)
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.enqueue(Command::AddRangeToSet {
            key: key.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
    }

    pub fn remove_from_set(&mut self, key: &str, value: &str) {
        self.enqueue(Command::RemoveFromSet {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    pub fn remove_set(&mut self, key: &str) {
        self.enqueue(Command::RemoveSet {
            key: key.to_string(),
        });
    }

    pub fn expire_set(&mut self, key: &str, ttl: Duration) {
        self.expire_key(KeyedTable::Set, key, ttl);
    }

    pub fn persist_set(&mut self, key: &str) {
        self.persist_key(KeyedTable::Set, key);
    }

    // ============== Lists ==============

    pub fn insert_to_list(&mut self, key: &str, value: &str) {
        self.enqueue(Command::InsertToList {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    pub fn remove_from_list(&mut self, key: &str, value: &str) {
        self.enqueue(Command::RemoveFromList {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    /// Keep only rows whose recency rank is within `start..=end` (0 = newest).
    pub fn trim_list(&mut self, key: &str, start: usize, end: usize) {
        self.enqueue(Command::TrimList {
            key: key.to_string(),
            start,
            end,
        });
    }

    pub fn expire_list(&mut self, key: &str, ttl: Duration) {
        self.expire_key(KeyedTable::List, key, ttl);
    }

    pub fn persist_list(&mut self, key: &str) {
        self.persist_key(KeyedTable::List, key);
    }

    // ============== Hashes ==============

    pub fn set_range_in_hash<I, F, V>(&mut self, key: &str, fields: I)
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<String>,
    {
        self.enqueue(Command::SetRangeInHash {
            key: key.to_string(),
            fields: fields
                .into_iter()
                .map(|(field, value)| (field.into(), value.into()))
                .collect(),
        });
    }

    pub fn remove_hash(&mut self, key: &str) {
        self.enqueue(Command::RemoveHash {
            key: key.to_string(),
        });
    }

    pub fn expire_hash(&mut self, key: &str, ttl: Duration) {
        self.expire_key(KeyedTable::Hash, key, ttl);
    }

    pub fn persist_hash(&mut self, key: &str) {
        self.persist_key(KeyedTable::Hash, key);
    }

    fn expire_key(&mut self, table: KeyedTable, key: &str, ttl: Duration) {
        self.enqueue(Command::ExpireKey {
            table,
            key: key.to_string(),
            ttl,
        });
    }

    fn persist_key(&mut self, table: KeyedTable, key: &str) {
        self.enqueue(Command::PersistKey {
            table,
            key: key.to_string(),
        });
    }

    // ============== Commit ==============

    /// Apply every queued command, in order, as one atomic unit.
    ///
    /// On error nothing from this batch persists and the error is returned
    /// unchanged. There is no retry here.
    pub fn commit(mut self) -> Result<(), BatchError> {
        if self.commands.is_empty() {
            self.state = BatchState::Committed;
            return Ok(());
        }

        self.state = BatchState::Committing;
        let batch_size = self.commands.len();

        let unit = match AtomicUnit::begin(self.conn) {
            Ok(unit) => unit,
            Err(e) => {
                self.state = BatchState::Aborted;
                warn!(error = %e, batch_size, "Failed to open write batch");
                return Err(e.into());
            }
        };

        let ctx = ApplyContext {
            providers: &self.providers,
            classifier: self.classifier.as_ref(),
            now: now_ms(),
        };

        let applied = self.commands.iter().enumerate().try_for_each(|(index, command)| {
            command.apply(unit.connection(), &ctx).map_err(|e| {
                warn!(error = %e, index, kind = command.kind(), "Write batch command failed");
                e
            })
        });

        // Inside an ambient transaction the outer unit may still roll back,
        // so only a batch that owns its transaction may populate the cache.
        let owns_unit = unit.is_transaction();

        let outcome = match applied {
            Ok(()) => unit.finalize().map_err(BatchError::from),
            Err(e) => {
                unit.abort();
                Err(e)
            }
        };

        match outcome {
            Ok(()) => {
                self.state = BatchState::Committed;
                if owns_unit {
                    self.mark_registered_queues();
                }
                debug!(batch_size, "Write batch committed");
                Ok(())
            }
            Err(e) => {
                self.state = BatchState::Aborted;
                warn!(error = %e, batch_size, "Write batch aborted");
                Err(e)
            }
        }
    }

    /// Cache the queues this batch registered. Only called once committed.
    fn mark_registered_queues(&self) {
        for command in &self.commands {
            if let Command::AddToQueue {
                queue,
                queue_type,
                register: true,
                ..
            } = command
            {
                self.queue_cache.mark(queue_type, queue);
            }
        }
    }
}

impl Drop for WriteBatch<'_> {
    fn drop(&mut self) {
        if self.state == BatchState::Pending && !self.commands.is_empty() {
            debug!(
                batch_size = self.commands.len(),
                "Write batch discarded without commit"
            );
        }
    }
}

/// The transaction or savepoint that a batch replays into.
enum AtomicUnit<'c> {
    Transaction(Transaction<'c>),
    Savepoint(SavepointGuard<'c>),
}

impl<'c> AtomicUnit<'c> {
    fn begin(conn: &'c Connection) -> Result<Self, rusqlite::Error> {
        if conn.is_autocommit() {
            // IMMEDIATE takes the write lock now, so no other writer can
            // interleave with the batch.
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            Ok(AtomicUnit::Transaction(tx))
        } else {
            let name = format!("write_batch_{}", SAVEPOINT_SEQ.fetch_add(1, Ordering::Relaxed));
            conn.execute_batch(&format!("SAVEPOINT {}", name))?;
            debug!(savepoint = %name, "Write batch joined ambient transaction");
            Ok(AtomicUnit::Savepoint(SavepointGuard {
                conn,
                name,
                finished: false,
            }))
        }
    }

    fn is_transaction(&self) -> bool {
        matches!(self, AtomicUnit::Transaction(_))
    }

    fn connection(&self) -> &Connection {
        match self {
            AtomicUnit::Transaction(tx) => &**tx,
            AtomicUnit::Savepoint(sp) => sp.conn,
        }
    }

    fn finalize(self) -> Result<(), rusqlite::Error> {
        match self {
            AtomicUnit::Transaction(tx) => tx.commit(),
            AtomicUnit::Savepoint(mut sp) => {
                sp.conn.execute_batch(&format!("RELEASE {}", sp.name))?;
                sp.finished = true;
                Ok(())
            }
        }
    }

    /// Roll back. Failures are logged only: the engine may already have
    /// rolled back on its own, and the caller gets the original error.
    fn abort(self) {
        let result = match self {
            AtomicUnit::Transaction(tx) => tx.rollback(),
            AtomicUnit::Savepoint(mut sp) => {
                sp.finished = true;
                sp.rollback()
            }
        };
        if let Err(e) = result {
            warn!(error = %e, "Write batch rollback reported an error");
        }
    }
}

struct SavepointGuard<'c> {
    conn: &'c Connection,
    name: String,
    finished: bool,
}

impl SavepointGuard<'_> {
    fn rollback(&self) -> Result<(), rusqlite::Error> {
        self.conn.execute_batch(&format!(
            "ROLLBACK TO {name}; RELEASE {name}",
            name = self.name
        ))
    }
}

impl Drop for SavepointGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.rollback() {
                warn!(error = %e, savepoint = %self.name, "Failed to roll back savepoint");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool(" ON "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("No"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_default_options_enable_cache() {
        assert!(WriteBatchOptions::default().queue_cache_enabled);
    }
}
