//! SQLite database migrations for the job store.

use rusqlite::Connection;
use tracing::info;

/// Run all database migrations.
pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    // Create migrations table to track applied migrations
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Check which migrations have been applied
    let applied: Vec<String> = {
        let mut stmt = conn.prepare("SELECT name FROM migrations")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.filter_map(|r| r.ok()).collect()
    };

    let mut applied_count = 0;

    // Migration 1: jobs and their append-only state history
    if !applied.contains(&"001_create_jobs".to_string()) {
        conn.execute_batch(
            "CREATE TABLE jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                state_id INTEGER,
                state_name TEXT,
                invocation_data TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expire_at INTEGER
            );

            CREATE INDEX idx_jobs_state_name ON jobs(state_name);
            CREATE INDEX idx_jobs_expire_at ON jobs(expire_at) WHERE expire_at IS NOT NULL;

            CREATE TABLE job_states (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                reason TEXT,
                created_at INTEGER NOT NULL,
                data TEXT
            );

            CREATE INDEX idx_job_states_job_id ON job_states(job_id);

            INSERT INTO migrations (name, applied_at) VALUES ('001_create_jobs', strftime('%s', 'now'));
            ",
        )?;
        applied_count += 1;
    }

    // Migration 2: queue registry and the default job queue
    // UNIQUE(name) turns "same name, different type" into its own violation.
    if !applied.contains(&"002_create_queues".to_string()) {
        conn.execute_batch(
            "CREATE TABLE queues (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue_type TEXT NOT NULL,
                name TEXT NOT NULL,
                UNIQUE (queue_type, name)
            );

            CREATE UNIQUE INDEX ux_queues_name ON queues(name);

            CREATE TABLE job_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id INTEGER NOT NULL,
                queue TEXT NOT NULL,
                fetched_at INTEGER
            );

            CREATE INDEX idx_job_queue_queue ON job_queue(queue, fetched_at);

            INSERT INTO migrations (name, applied_at) VALUES ('002_create_queues', strftime('%s', 'now'));
            ",
        )?;
        applied_count += 1;
    }

    // Migration 3: append-only counters
    if !applied.contains(&"003_create_counters".to_string()) {
        conn.execute_batch(
            "CREATE TABLE counters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                value INTEGER NOT NULL,
                expire_at INTEGER
            );

            CREATE INDEX idx_counters_key ON counters(key);

            INSERT INTO migrations (name, applied_at) VALUES ('003_create_counters', strftime('%s', 'now'));
            ",
        )?;
        applied_count += 1;
    }

    // Migration 4: sorted sets
    if !applied.contains(&"004_create_sets".to_string()) {
        conn.execute_batch(
            "CREATE TABLE sets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                score REAL NOT NULL DEFAULT 0,
                expire_at INTEGER,
                UNIQUE (key, value)
            );

            CREATE INDEX idx_sets_key_score ON sets(key, score);

            INSERT INTO migrations (name, applied_at) VALUES ('004_create_sets', strftime('%s', 'now'));
            ",
        )?;
        applied_count += 1;
    }

    // Migration 5: lists, id gives insertion order
    if !applied.contains(&"005_create_lists".to_string()) {
        conn.execute_batch(
            "CREATE TABLE lists (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                value TEXT,
                expire_at INTEGER
            );

            CREATE INDEX idx_lists_key ON lists(key, id);

            INSERT INTO migrations (name, applied_at) VALUES ('005_create_lists', strftime('%s', 'now'));
            ",
        )?;
        applied_count += 1;
    }

    // Migration 6: hashes
    if !applied.contains(&"006_create_hashes".to_string()) {
        conn.execute_batch(
            "CREATE TABLE hashes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT,
                expire_at INTEGER,
                UNIQUE (key, field)
            );

            INSERT INTO migrations (name, applied_at) VALUES ('006_create_hashes', strftime('%s', 'now'));
            ",
        )?;
        applied_count += 1;
    }

    if applied_count > 0 {
        info!(count = applied_count, "Applied SQLite migrations");
    }

    Ok(())
}
