//! Storage fault classification.
//!
//! Only one fault gets domain meaning in the write layer: a uniqueness
//! violation on a known constraint. Everything else passes through untouched.

use rusqlite::{ffi, ErrorCode};

/// Constraint reported when a queue name already exists under another type.
pub const QUEUE_NAME_CONSTRAINT: &str = "queues.name";

/// Classified storage fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageFault {
    /// A uniqueness constraint rejected a write.
    UniqueViolation { constraint: String },
    Other,
}

/// Classifies storage errors. Pluggable per backing store.
pub trait FaultClassifier: Send + Sync {
    fn classify(&self, err: &rusqlite::Error) -> StorageFault;
}

/// Classifier for SQLite's `UNIQUE constraint failed: <table>.<columns>` faults.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteFaultClassifier;

const UNIQUE_FAILED_PREFIX: &str = "UNIQUE constraint failed: ";

impl FaultClassifier for SqliteFaultClassifier {
    fn classify(&self, err: &rusqlite::Error) -> StorageFault {
        match err {
            rusqlite::Error::SqliteFailure(e, Some(msg))
                if e.code == ErrorCode::ConstraintViolation
                    && matches!(
                        e.extended_code,
                        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    ) =>
            {
                let constraint = msg
                    .strip_prefix(UNIQUE_FAILED_PREFIX)
                    .unwrap_or(msg)
                    .trim()
                    .to_string();
                StorageFault::UniqueViolation { constraint }
            }
            _ => StorageFault::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn_with_table() -> Connection {
        let conn = Connection::open_in_memory().expect("Failed to open in-memory db");
        conn.execute_batch(
            "CREATE TABLE queues (
                 queue_type TEXT NOT NULL,
                 name TEXT NOT NULL,
                 weight INTEGER CHECK (weight >= 0)
             );
             CREATE UNIQUE INDEX ux_queues_name ON queues(name);
             INSERT INTO queues (queue_type, name) VALUES ('sqlite', 'default');",
        )
        .expect("Failed to create table");
        conn
    }

    #[test]
    fn test_unique_violation_names_constraint() {
        let conn = conn_with_table();
        let err = conn
            .execute(
                "INSERT INTO queues (queue_type, name) VALUES ('remote', 'default')",
                [],
            )
            .expect_err("Insert should violate ux_queues_name");

        assert_eq!(
            SqliteFaultClassifier.classify(&err),
            StorageFault::UniqueViolation {
                constraint: QUEUE_NAME_CONSTRAINT.to_string()
            }
        );
    }

    #[test]
    fn test_other_constraints_are_not_unique_violations() {
        let conn = conn_with_table();
        let err = conn
            .execute(
                "INSERT INTO queues (queue_type, name, weight) VALUES ('sqlite', 'other', -1)",
                [],
            )
            .expect_err("Insert should violate CHECK");
        assert_eq!(SqliteFaultClassifier.classify(&err), StorageFault::Other);

        let err = conn
            .execute("INSERT INTO queues (queue_type) VALUES ('sqlite')", [])
            .expect_err("Insert should violate NOT NULL");
        assert_eq!(SqliteFaultClassifier.classify(&err), StorageFault::Other);
    }

    #[test]
    fn test_non_constraint_errors_are_other() {
        let conn = conn_with_table();
        let err = conn
            .execute("INSERT INTO missing_table (x) VALUES (1)", [])
            .expect_err("Table does not exist");
        assert_eq!(SqliteFaultClassifier.classify(&err), StorageFault::Other);
        assert_eq!(
            SqliteFaultClassifier.classify(&rusqlite::Error::QueryReturnedNoRows),
            StorageFault::Other
        );
    }
}
