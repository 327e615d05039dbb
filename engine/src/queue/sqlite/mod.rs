//! SQLite storage layer for the job store.
//!
//! - WAL mode for durability
//! - Write batches committed as one serializable unit
//! - Process-wide queue registration cache shared by every batch

mod commands;
mod error;
mod fault;
mod job_queue;
mod jobs;
mod migration;
mod queue_cache;
mod write_batch;


use parking_lot::Mutex;
use rusqlite::Connection;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::protocol::{JobRecord, StateRecord};
use crate::queue::storage::QueueProviders;

pub use commands::{Command, KeyedTable, NewState};
pub use error::BatchError;
pub use fault::{FaultClassifier, SqliteFaultClassifier, StorageFault, QUEUE_NAME_CONSTRAINT};
pub use job_queue::{SqliteJobQueue, SQLITE_QUEUE_TYPE};
pub use queue_cache::QueueRegistrationCache;
pub use write_batch::{BatchState, WriteBatch, WriteBatchOptions};

/// SQLite storage configuration
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file
    pub path: PathBuf,
    /// Enable WAL mode (recommended)
    pub wal_mode: bool,
    /// Synchronous mode: 0=OFF, 1=NORMAL, 2=FULL
    pub synchronous: i32,
    /// Cache size in pages (negative = KB)
    pub cache_size: i32,
    /// How long a writer waits for the database lock before failing
    pub busy_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("jobstore.db"),
            wal_mode: true,
            synchronous: 1,     // NORMAL - good balance of safety and speed
            cache_size: -64000, // 64MB cache
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl SqliteConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let path = std::env::var("DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("jobstore.db"));

        let synchronous = std::env::var("SQLITE_SYNCHRONOUS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);

        let cache_size = std::env::var("SQLITE_CACHE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(-64000);

        let busy_timeout = std::env::var("SQLITE_BUSY_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(5));

        Self {
            path,
            wal_mode: true,
            synchronous,
            cache_size,
            busy_timeout,
        }
    }
}

/// Open a connection configured for the job store.
pub fn open_connection(config: &SqliteConfig) -> Result<Connection, rusqlite::Error> {
    // Create parent directories if they don't exist
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let conn = Connection::open(&config.path)?;
    conn.busy_timeout(config.busy_timeout)?;

    conn.execute_batch(&format!(
        "PRAGMA journal_mode = {};
         PRAGMA synchronous = {};
         PRAGMA cache_size = {};
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;",
        if config.wal_mode { "WAL" } else { "DELETE" },
        config.synchronous,
        config.cache_size,
    ))?;

    Ok(conn)
}

/// SQLite storage layer for the job store.
pub struct SqliteStorage {
    /// Primary connection (protected by Mutex for thread safety)
    conn: Mutex<Connection>,
    config: SqliteConfig,
    providers: Arc<QueueProviders>,
    queue_cache: Arc<QueueRegistrationCache>,
    options: WriteBatchOptions,
}

impl SqliteStorage {
    /// Create a new SQLite storage using the default `sqlite` job queue.
    pub fn new(config: SqliteConfig) -> Result<Self, rusqlite::Error> {
        let conn = open_connection(&config)?;

        info!(path = %config.path.display(), "SQLite initialized");

        Ok(Self {
            conn: Mutex::new(conn),
            config,
            providers: Arc::new(QueueProviders::new(Arc::new(SqliteJobQueue::new()))),
            queue_cache: Arc::new(QueueRegistrationCache::new()),
            options: WriteBatchOptions::default(),
        })
    }

    /// Create with configuration from the environment
    pub fn from_env() -> Result<Self, rusqlite::Error> {
        let storage = Self::new(SqliteConfig::from_env())?;
        Ok(storage.with_options(WriteBatchOptions::from_env()))
    }

    /// Set queue providers
    pub fn with_providers(mut self, providers: QueueProviders) -> Self {
        self.providers = Arc::new(providers);
        self
    }

    /// Share a registration cache with other storages in the process
    pub fn with_queue_cache(mut self, cache: Arc<QueueRegistrationCache>) -> Self {
        self.queue_cache = cache;
        self
    }

    /// Set write batch options
    pub fn with_options(mut self, options: WriteBatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn providers(&self) -> &Arc<QueueProviders> {
        &self.providers
    }

    pub fn queue_cache(&self) -> &Arc<QueueRegistrationCache> {
        &self.queue_cache
    }

    /// Run database migrations
    pub fn migrate(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock();
        migration::migrate(&conn)
    }

    /// Open an additional connection with the same configuration.
    pub fn open_connection(&self) -> Result<Connection, rusqlite::Error> {
        open_connection(&self.config)
    }

    /// Run `f` with the primary connection locked.
    pub fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Start a write batch on `conn`, sharing this storage's providers and cache.
    pub fn write_batch<'c>(&self, conn: &'c Connection) -> Result<WriteBatch<'c>, BatchError> {
        let batch = WriteBatch::new(
            conn,
            Arc::clone(&self.providers),
            Arc::clone(&self.queue_cache),
        )?;
        Ok(batch.with_options(self.options))
    }

    /// Build and commit a batch on the primary connection.
    pub fn commit_batch<F>(&self, build: F) -> Result<(), BatchError>
    where
        F: FnOnce(&mut WriteBatch<'_>),
    {
        let conn = self.conn.lock();
        let mut batch = self.write_batch(&conn)?;
        build(&mut batch);
        batch.commit()
    }

    // ============== Job Operations ==============

    /// Create a job with no state (expiring, like a job still being created)
    pub fn create_job(
        &self,
        invocation_data: &Value,
        expire_in: Option<Duration>,
    ) -> Result<u64, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::create_job(&conn, invocation_data, expire_in)
    }

    pub fn get_job(&self, job_id: u64) -> Result<Option<JobRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::get_job(&conn, job_id)
    }

    pub fn get_state(&self, state_id: u64) -> Result<Option<StateRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::get_state(&conn, state_id)
    }

    pub fn load_state_history(&self, job_id: u64) -> Result<Vec<StateRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::load_state_history(&conn, job_id)
    }

    // ============== Queues ==============

    pub fn get_queue_type(&self, queue: &str) -> Result<Option<String>, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::get_queue_type(&conn, queue)
    }

    pub fn load_queues(&self) -> Result<Vec<(String, String)>, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::load_queues(&conn)
    }

    pub fn load_enqueued_jobs(&self, queue: &str) -> Result<Vec<u64>, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::load_enqueued_jobs(&conn, queue)
    }

    // ============== Counters, Sets, Lists, Hashes ==============

    pub fn get_counter(&self, key: &str) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::get_counter(&conn, key)
    }

    pub fn load_counter_rows(
        &self,
        key: &str,
    ) -> Result<Vec<(u64, i64, Option<u64>)>, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::load_counter_rows(&conn, key)
    }

    pub fn load_set(&self, key: &str) -> Result<Vec<(String, f64)>, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::load_set(&conn, key)
    }

    pub fn load_list(&self, key: &str) -> Result<Vec<String>, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::load_list(&conn, key)
    }

    pub fn load_hash(&self, key: &str) -> Result<BTreeMap<String, String>, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::load_hash(&conn, key)
    }

    pub fn get_key_expire_at(
        &self,
        table: KeyedTable,
        key: &str,
    ) -> Result<Option<u64>, rusqlite::Error> {
        let conn = self.conn.lock();
        jobs::get_key_expire_at(&conn, table, key)
    }
}
