// Database storage layer
//
// The target database carries two migraph tables next to the user's schema:
// - migraph_version: single-row pointer to the last applied revision,
//   owned by the execution engine
// - migraph_version_history: log of applied transitions, owned by the
//   application log; rows are only removed by a downgrade
//
// Both share one connection. The engine writes a step's log row in the
// same transaction that moves the pointer.

pub mod engine;
pub mod history;

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use engine::{SqliteEngine, VERSION_TABLE};
pub use history::{ApplicationLog, LogEntry, HISTORY_TABLE, NO_REVISION};

/// Snapshot of the migraph tables in a database
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStatus {
    pub path: String,
    pub current_revision: Option<String>,
    pub logged_transitions: usize,
}

/// Connection to the target database
pub struct MigrationDb {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for MigrationDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationDb")
            .field("path", &self.path)
            .finish()
    }
}

impl MigrationDb {
    /// Open (or create) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Private in-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self) -> ApplicationLog<'_> {
        ApplicationLog::new(&self.conn)
    }

    pub fn engine(&self) -> SqliteEngine<'_> {
        SqliteEngine::new(&self.conn)
    }

    pub fn status(&self) -> Result<DatabaseStatus> {
        use crate::upgrade::ExecutionEngine;

        Ok(DatabaseStatus {
            path: self.path.display().to_string(),
            current_revision: self.engine().current_revision()?,
            logged_transitions: self.log().len()?,
        })
    }
}

/// Whether `table` exists in the main schema
pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_database_status() {
        let db = MigrationDb::open_in_memory().unwrap();
        let status = db.status().unwrap();
        assert_eq!(status.current_revision, None);
        assert_eq!(status.logged_transitions, 0);
        assert!(!table_exists(db.conn(), HISTORY_TABLE).unwrap());
    }

    #[test]
    fn test_open_creates_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("target.db");
        let db = MigrationDb::open(&path).unwrap();
        db.log().append(Some("a"), "b").unwrap();
        drop(db);

        assert!(path.exists());
        let reopened = MigrationDb::open(&path).unwrap();
        assert_eq!(reopened.status().unwrap().logged_transitions, 1);
    }
}
