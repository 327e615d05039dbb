//! Default job queue provider backed by the `job_queue` table.

use rusqlite::{params, Connection};

use crate::queue::storage::JobQueue;

/// Queue type recorded for queues served by [`SqliteJobQueue`].
pub const SQLITE_QUEUE_TYPE: &str = "sqlite";

/// Stores enqueued job ids in the same database as the rest of the batch.
#[derive(Debug, Clone)]
pub struct SqliteJobQueue {
    queue_type: String,
}

impl SqliteJobQueue {
    pub fn new() -> Self {
        Self::with_type(SQLITE_QUEUE_TYPE)
    }

    /// Same storage, different registered type. Used by deployments that
    /// partition queue ownership by type.
    pub fn with_type(queue_type: impl Into<String>) -> Self {
        Self {
            queue_type: queue_type.into(),
        }
    }
}

impl Default for SqliteJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for SqliteJobQueue {
    fn queue_type(&self) -> &str {
        &self.queue_type
    }

    fn enqueue(&self, conn: &Connection, queue: &str, job_id: u64) -> Result<(), rusqlite::Error> {
        conn.execute(
            "INSERT INTO job_queue (job_id, queue) VALUES (?1, ?2)",
            params![job_id as i64, queue],
        )?;
        Ok(())
    }
}
