//! Database layer for vmforge.
//!
//! SQLite persistence using the JSON blob pattern: a serialized spec plus
//! queryable columns for the fields listings need.

mod schema;
mod templates;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};

use vmforge_shared::errors::{ForgeError, ForgeResult};

pub use templates::SqliteTemplateStore;

/// Helper macro to convert rusqlite errors to ForgeError.
macro_rules! db_err {
    ($result:expr) => {
        $result.map_err(|e| ForgeError::Database(e.to_string()))
    };
}

pub(crate) use db_err;

/// SQLite database handle.
///
/// Thread-safe via `parking_lot::Mutex`. Domain-specific stores
/// wrap this to provide their APIs (e.g., `SqliteTemplateStore`).
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database.
    pub fn open(db_path: &Path) -> ForgeResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = db_err!(Connection::open(db_path))?;

        // - WAL mode: readers don't block the single writer
        // - FULL sync: fsync after each transaction
        // - Busy timeout: tolerate a second invocation briefly holding the file
        db_err!(conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=FULL;
            PRAGMA foreign_keys=ON;
            PRAGMA busy_timeout=10000;
            "
        ))?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> ForgeResult<Self> {
        let conn = db_err!(Connection::open_in_memory())?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the database connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Create tables, then stamp a fresh file or verify an existing stamp.
    ///
    /// Files written by any other schema version are refused; there is no
    /// migration path between versions.
    fn init_schema(conn: &Connection) -> ForgeResult<()> {
        for sql in schema::all_schemas() {
            db_err!(conn.execute_batch(sql))?;
        }

        let stamped: Option<i32> = db_err!(
            conn.query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
        )?;

        match stamped {
            Some(version) => check_schema_version(version),
            None => {
                db_err!(conn.execute(
                    "INSERT INTO schema_version (id, version, updated_at) VALUES (1, ?1, ?2)",
                    rusqlite::params![schema::SCHEMA_VERSION, Utc::now().to_rfc3339()],
                ))?;
                tracing::debug!(version = schema::SCHEMA_VERSION, "Stamped template catalog");
                Ok(())
            }
        }
    }
}

fn check_schema_version(version: i32) -> ForgeResult<()> {
    if version == schema::SCHEMA_VERSION {
        return Ok(());
    }
    Err(ForgeError::Database(format!(
        "template catalog has schema version {}, this build only reads version {}",
        version,
        schema::SCHEMA_VERSION
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_db_open() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let _db = Database::open(&db_path).unwrap();
    }

    #[test]
    fn test_db_reopen_keeps_schema_version() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");
        drop(Database::open(&db_path).unwrap());

        let db = Database::open(&db_path).unwrap();
        let version: i32 = db
            .conn()
            .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, schema::SCHEMA_VERSION);
    }

    #[test]
    fn test_other_schema_versions_rejected() {
        for stored in [0, schema::SCHEMA_VERSION + 1] {
            let temp_dir = TempDir::new().unwrap();
            let db_path = temp_dir.path().join("test.db");
            {
                let db = Database::open(&db_path).unwrap();
                db.conn()
                    .execute(
                        "UPDATE schema_version SET version = ?1 WHERE id = 1",
                        [stored],
                    )
                    .unwrap();
            }
            match Database::open(&db_path) {
                Err(ForgeError::Database(msg)) => {
                    assert!(msg.contains(&format!("schema version {}", stored)), "{msg}");
                }
                other => panic!("expected schema error for {stored}, got {:?}", other.err()),
            }
        }
    }
}
