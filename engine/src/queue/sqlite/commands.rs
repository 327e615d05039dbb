//! Mutation descriptors and their SQL encoding.
//!
//! A [`Command`] is pure data until the committer calls [`Command::apply`]
//! on the connection that holds the batch's atomic unit.

use std::collections::BTreeMap;
use std::time::Duration;

use rusqlite::{params, Connection};
use tracing::debug;

use super::error::BatchError;
use super::fault::{FaultClassifier, StorageFault, QUEUE_NAME_CONSTRAINT};
use crate::protocol::JobState;
use crate::queue::storage::QueueProviders;
use crate::queue::types::{expire_at, QueueName};

/// Keyed tables whose rows carry a per-key expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyedTable {
    Set,
    List,
    Hash,
}

impl KeyedTable {
    pub fn table_name(self) -> &'static str {
        match self {
            KeyedTable::Set => "sets",
            KeyedTable::List => "lists",
            KeyedTable::Hash => "hashes",
        }
    }
}

/// State snapshot taken when the command is queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewState {
    pub name: String,
    pub reason: Option<String>,
    pub data: BTreeMap<String, String>,
}

impl NewState {
    pub fn capture<S: JobState + ?Sized>(state: &S) -> Self {
        Self {
            name: state.name().to_string(),
            reason: state.reason().map(String::from),
            data: state.serialize_data(),
        }
    }
}

/// Pending mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Set job expiry to commit time + ttl
    ExpireJob { job_id: u64, ttl: Duration },
    /// Clear job expiry
    PersistJob { job_id: u64 },
    /// Append a state and point the job at it
    SetJobState { job_id: u64, state: NewState },
    /// Append a state only
    AddJobState { job_id: u64, state: NewState },
    /// Register the queue (unless cached) and hand the job to its provider
    AddToQueue {
        queue: QueueName,
        queue_type: QueueName,
        job_id: u64,
        register: bool,
    },
    /// Append a +1/-1 counter row
    AppendCounter {
        key: String,
        delta: i64,
        ttl: Option<Duration>,
    },
    AddToSet {
        key: String,
        value: String,
        score: f64,
    },
    AddRangeToSet { key: String, values: Vec<String> },
    RemoveFromSet { key: String, value: String },
    RemoveSet { key: String },
    InsertToList { key: String, value: String },
    RemoveFromList { key: String, value: String },
    /// Keep recency ranks `start..=end`, rank 0 being the newest row
    TrimList { key: String, start: usize, end: usize },
    SetRangeInHash {
        key: String,
        fields: Vec<(String, String)>,
    },
    RemoveHash { key: String },
    ExpireKey {
        table: KeyedTable,
        key: String,
        ttl: Duration,
    },
    PersistKey { table: KeyedTable, key: String },
}

/// Everything a command needs at commit time besides the connection.
pub(crate) struct ApplyContext<'a> {
    pub providers: &'a QueueProviders,
    pub classifier: &'a dyn FaultClassifier,
    /// Commit timestamp, shared by every command in the batch
    pub now: u64,
}

impl Command {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::ExpireJob { .. } => "expire_job",
            Command::PersistJob { .. } => "persist_job",
            Command::SetJobState { .. } => "set_job_state",
            Command::AddJobState { .. } => "add_job_state",
            Command::AddToQueue { .. } => "add_to_queue",
            Command::AppendCounter { .. } => "append_counter",
            Command::AddToSet { .. } => "add_to_set",
            Command::AddRangeToSet { .. } => "add_range_to_set",
            Command::RemoveFromSet { .. } => "remove_from_set",
            Command::RemoveSet { .. } => "remove_set",
            Command::InsertToList { .. } => "insert_to_list",
            Command::RemoveFromList { .. } => "remove_from_list",
            Command::TrimList { .. } => "trim_list",
            Command::SetRangeInHash { .. } => "set_range_in_hash",
            Command::RemoveHash { .. } => "remove_hash",
            Command::ExpireKey { .. } => "expire_key",
            Command::PersistKey { .. } => "persist_key",
        }
    }

    pub(crate) fn apply(
        &self,
        conn: &Connection,
        ctx: &ApplyContext<'_>,
    ) -> Result<(), BatchError> {
        match self {
            Command::ExpireJob { job_id, ttl } => {
                conn.execute(
                    "UPDATE jobs SET expire_at = ?2 WHERE id = ?1",
                    params![*job_id as i64, expire_at(ctx.now, *ttl)],
                )?;
            }
            Command::PersistJob { job_id } => {
                conn.execute(
                    "UPDATE jobs SET expire_at = NULL WHERE id = ?1",
                    params![*job_id as i64],
                )?;
            }
            Command::SetJobState { job_id, state } => {
                let state_id = insert_state(conn, *job_id, state, ctx.now)?;
                conn.execute(
                    "UPDATE jobs SET state_id = ?2, state_name = ?3 WHERE id = ?1",
                    params![*job_id as i64, state_id, state.name],
                )?;
                debug!(job_id, state_id, state = %state.name, "Job state set");
            }
            Command::AddJobState { job_id, state } => {
                insert_state(conn, *job_id, state, ctx.now)?;
            }
            Command::AddToQueue {
                queue,
                queue_type,
                job_id,
                register,
            } => {
                if *register {
                    register_queue(conn, queue_type, queue).map_err(|e| {
                        translate_registration_error(ctx.classifier, queue, queue_type, e)
                    })?;
                }
                ctx.providers.get(queue).enqueue(conn, queue, *job_id)?;
            }
            Command::AppendCounter { key, delta, ttl } => {
                conn.execute(
                    "INSERT INTO counters (key, value, expire_at) VALUES (?1, ?2, ?3)",
                    params![key, delta, ttl.map(|t| expire_at(ctx.now, t))],
                )?;
            }
            Command::AddToSet { key, value, score } => {
                conn.execute(
                    "INSERT INTO sets (key, value, score) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key, value) DO UPDATE SET score = excluded.score",
                    params![key, value, score],
                )?;
            }
            Command::AddRangeToSet { key, values } => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO sets (key, value, score) VALUES (?1, ?2, 0.0)
                     ON CONFLICT(key, value) DO NOTHING",
                )?;
                for value in values {
                    stmt.execute(params![key, value])?;
                }
            }
            Command::RemoveFromSet { key, value } => {
                conn.execute(
                    "DELETE FROM sets WHERE key = ?1 AND value = ?2",
                    params![key, value],
                )?;
            }
            Command::RemoveSet { key } => {
                conn.execute("DELETE FROM sets WHERE key = ?1", params![key])?;
            }
            Command::InsertToList { key, value } => {
                conn.execute(
                    "INSERT INTO lists (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
            }
            Command::RemoveFromList { key, value } => {
                conn.execute(
                    "DELETE FROM lists WHERE key = ?1 AND value = ?2",
                    params![key, value],
                )?;
            }
            Command::TrimList { key, start, end } => {
                let removed = trim_list(conn, key, *start, *end)?;
                debug!(key = %key, start, end, removed, "List trimmed");
            }
            Command::SetRangeInHash { key, fields } => {
                let mut stmt = conn.prepare_cached(
                    "INSERT INTO hashes (key, field, value) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key, field) DO UPDATE SET value = excluded.value",
                )?;
                for (field, value) in fields {
                    stmt.execute(params![key, field, value])?;
                }
            }
            Command::RemoveHash { key } => {
                conn.execute("DELETE FROM hashes WHERE key = ?1", params![key])?;
            }
            Command::ExpireKey { table, key, ttl } => {
                conn.execute(
                    &format!("UPDATE {} SET expire_at = ?2 WHERE key = ?1", table.table_name()),
                    params![key, expire_at(ctx.now, *ttl)],
                )?;
            }
            Command::PersistKey { table, key } => {
                conn.execute(
                    &format!("UPDATE {} SET expire_at = NULL WHERE key = ?1", table.table_name()),
                    params![key],
                )?;
            }
        }
        Ok(())
    }
}

/// Insert a state record and return the id generated by that same statement.
fn insert_state(
    conn: &Connection,
    job_id: u64,
    state: &NewState,
    now: u64,
) -> Result<i64, BatchError> {
    let data = serde_json::to_string(&state.data)?;
    let state_id = conn.query_row(
        "INSERT INTO job_states (job_id, name, reason, created_at, data)
         VALUES (?1, ?2, ?3, ?4, ?5)
         RETURNING id",
        params![job_id as i64, state.name, state.reason, now as i64, data],
        |row| row.get(0),
    )?;
    Ok(state_id)
}

/// Insert `(queue_type, name)` unless that exact pair already exists.
///
/// The existence check makes a matching pair a no-op. A name held by a
/// different type still reaches the insert and trips `ux_queues_name`.
fn register_queue(conn: &Connection, queue_type: &str, queue: &str) -> Result<(), rusqlite::Error> {
    let inserted = conn.execute(
        "INSERT INTO queues (queue_type, name)
         SELECT ?1, ?2
         WHERE NOT EXISTS (SELECT 1 FROM queues WHERE queue_type = ?1 AND name = ?2)",
        params![queue_type, queue],
    )?;
    if inserted > 0 {
        debug!(queue_type, queue, "Queue registered");
    }
    Ok(())
}

fn translate_registration_error(
    classifier: &dyn FaultClassifier,
    queue: &str,
    queue_type: &str,
    err: rusqlite::Error,
) -> BatchError {
    match classifier.classify(&err) {
        StorageFault::UniqueViolation { constraint } if constraint == QUEUE_NAME_CONSTRAINT => {
            BatchError::QueueConflict {
                queue: queue.to_string(),
                queue_type: queue_type.to_string(),
            }
        }
        _ => BatchError::Storage(err),
    }
}

/// Delete every row of `key` whose recency rank falls outside `start..=end`.
fn trim_list(
    conn: &Connection,
    key: &str,
    start: usize,
    end: usize,
) -> Result<usize, rusqlite::Error> {
    if end < start {
        return conn.execute("DELETE FROM lists WHERE key = ?1", params![key]);
    }
    let keep = (end - start).saturating_add(1);
    conn.execute(
        "DELETE FROM lists
         WHERE key = ?1
           AND id NOT IN (
               SELECT id FROM lists WHERE key = ?1
               ORDER BY id DESC
               LIMIT ?2 OFFSET ?3
           )",
        params![
            key,
            i64::try_from(keep).unwrap_or(i64::MAX),
            i64::try_from(start).unwrap_or(i64::MAX)
        ],
    )
}
