//! SQLite read-side and seeding operations.
//!
//! The write layer never reads. These helpers back the higher-level storage
//! API and let tests observe what a committed batch left behind.

use std::collections::BTreeMap;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

use super::commands::KeyedTable;
use crate::protocol::{JobRecord, StateRecord};
use crate::queue::types::{expire_at, now_ms};

fn json_column<T: serde::de::DeserializeOwned>(
    idx: usize,
    text: &str,
) -> Result<T, rusqlite::Error> {
    serde_json::from_str(text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[inline]
fn opt_u64(v: Option<i64>) -> Option<u64> {
    v.map(|v| v as u64)
}

/// Create a job row with no state yet, expiring after `expire_in`.
pub fn create_job(
    conn: &Connection,
    invocation_data: &Value,
    expire_in: Option<Duration>,
) -> Result<u64, rusqlite::Error> {
    let now = now_ms();
    let data = serde_json::to_string(invocation_data)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO jobs (invocation_data, created_at, expire_at) VALUES (?1, ?2, ?3)",
        params![data, now as i64, expire_in.map(|ttl| expire_at(now, ttl))],
    )?;
    Ok(conn.last_insert_rowid() as u64)
}

fn row_to_job(row: &Row<'_>) -> Result<JobRecord, rusqlite::Error> {
    let data: String = row.get(3)?;
    Ok(JobRecord {
        id: row.get::<_, i64>(0)? as u64,
        state_id: opt_u64(row.get(1)?),
        state_name: row.get(2)?,
        invocation_data: json_column(3, &data)?,
        created_at: row.get::<_, i64>(4)? as u64,
        expire_at: opt_u64(row.get(5)?),
    })
}

pub fn get_job(conn: &Connection, job_id: u64) -> Result<Option<JobRecord>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, state_id, state_name, invocation_data, created_at, expire_at
         FROM jobs WHERE id = ?1",
        params![job_id as i64],
        row_to_job,
    )
    .optional()
}

fn row_to_state(row: &Row<'_>) -> Result<StateRecord, rusqlite::Error> {
    let data: Option<String> = row.get(5)?;
    Ok(StateRecord {
        id: row.get::<_, i64>(0)? as u64,
        job_id: row.get::<_, i64>(1)? as u64,
        name: row.get(2)?,
        reason: row.get(3)?,
        created_at: row.get::<_, i64>(4)? as u64,
        data: match data {
            Some(d) => json_column(5, &d)?,
            None => BTreeMap::new(),
        },
    })
}

pub fn get_state(conn: &Connection, state_id: u64) -> Result<Option<StateRecord>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, job_id, name, reason, created_at, data FROM job_states WHERE id = ?1",
        params![state_id as i64],
        row_to_state,
    )
    .optional()
}

/// State history of a job, oldest first.
pub fn load_state_history(
    conn: &Connection,
    job_id: u64,
) -> Result<Vec<StateRecord>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, job_id, name, reason, created_at, data
         FROM job_states WHERE job_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![job_id as i64], row_to_state)?;
    rows.collect()
}

/// Registered type of a queue, if any.
pub fn get_queue_type(conn: &Connection, queue: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT queue_type FROM queues WHERE name = ?1",
        params![queue],
        |row| row.get(0),
    )
    .optional()
}

/// All registered `(queue_type, name)` pairs.
pub fn load_queues(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT queue_type, name FROM queues ORDER BY id")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// Job ids placed on a queue by the default provider, in enqueue order.
pub fn load_enqueued_jobs(conn: &Connection, queue: &str) -> Result<Vec<u64>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT job_id FROM job_queue WHERE queue = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![queue], |row| row.get::<_, i64>(0).map(|id| id as u64))?;
    rows.collect()
}

/// Logical counter value: the sum of every appended row.
pub fn get_counter(conn: &Connection, key: &str) -> Result<i64, rusqlite::Error> {
    conn.query_row(
        "SELECT COALESCE(SUM(value), 0) FROM counters WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
}

/// Raw counter rows `(id, value, expire_at)` in insertion order.
pub fn load_counter_rows(
    conn: &Connection,
    key: &str,
) -> Result<Vec<(u64, i64, Option<u64>)>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT id, value, expire_at FROM counters WHERE key = ?1 ORDER BY id")?;
    let rows = stmt.query_map(params![key], |row| {
        Ok((row.get::<_, i64>(0)? as u64, row.get(1)?, opt_u64(row.get(2)?)))
    })?;
    rows.collect()
}

/// Set members with their scores, lowest score first.
pub fn load_set(conn: &Connection, key: &str) -> Result<Vec<(String, f64)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT value, score FROM sets WHERE key = ?1 ORDER BY score, id")?;
    let rows = stmt.query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

/// List values, most recently inserted first (rank order).
pub fn load_list(conn: &Connection, key: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT value FROM lists WHERE key = ?1 ORDER BY id DESC")?;
    let rows = stmt.query_map(params![key], |row| row.get(0))?;
    rows.collect()
}

pub fn load_hash(
    conn: &Connection,
    key: &str,
) -> Result<BTreeMap<String, String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT field, value FROM hashes WHERE key = ?1")?;
    let rows = stmt.query_map(params![key], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?.unwrap_or_default()))
    })?;
    rows.collect()
}

/// Expiry of a keyed collection. `None` when persistent or absent.
pub fn get_key_expire_at(
    conn: &Connection,
    table: KeyedTable,
    key: &str,
) -> Result<Option<u64>, rusqlite::Error> {
    let expire_at: Option<i64> = conn.query_row(
        &format!("SELECT MIN(expire_at) FROM {} WHERE key = ?1", table.table_name()),
        params![key],
        |row| row.get(0),
    )?;
    Ok(opt_u64(expire_at))
}
