//! SQLite execution engine
//!
//! Each step runs in one transaction: the script's statements, the
//! current-revision pointer and the application log row commit together or
//! not at all.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::history::{append_within, remove_within};
use super::table_exists;
use crate::error::{Error, Result};
use crate::script::Script;
use crate::upgrade::ExecutionEngine;

pub const VERSION_TABLE: &str = "migraph_version";

/// Applies scripts to a SQLite database
#[derive(Debug, Clone, Copy)]
pub struct SqliteEngine<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteEngine<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

fn ensure_version_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migraph_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            revision TEXT NOT NULL
        )",
    )?;
    Ok(())
}

fn run_statements(conn: &Connection, script: &Script, statements: &[String]) -> Result<()> {
    for (i, statement) in statements.iter().enumerate() {
        debug!(revision = script.id(), statement = i, "executing statement");
        conn.execute_batch(statement).map_err(|e| Error::Execution {
            revision: script.id().to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

fn set_pointer(conn: &Connection, revision: Option<&str>) -> Result<()> {
    match revision {
        Some(revision) => conn.execute(
            "INSERT INTO migraph_version (id, revision) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET revision = excluded.revision",
            params![revision],
        )?,
        None => conn.execute("DELETE FROM migraph_version WHERE id = 1", [])?,
    };
    Ok(())
}

impl ExecutionEngine for SqliteEngine<'_> {
    fn apply(&mut self, script: &Script) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        ensure_version_table(&tx)?;
        run_statements(&tx, script, &script.payload().upgrade)?;
        set_pointer(&tx, Some(script.id()))?;
        let logged = match script.predecessor() {
            Some(previous) => append_within(&tx, Some(&previous), script.id())?,
            None => false,
        };
        tx.commit()?;
        Ok(logged)
    }

    fn revert(&mut self, script: &Script, pointer: Option<&str>) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        ensure_version_table(&tx)?;
        run_statements(&tx, script, &script.payload().downgrade)?;
        set_pointer(&tx, pointer)?;
        let unlogged = remove_within(&tx, script.id())?;
        tx.commit()?;
        Ok(unlogged)
    }

    fn current_revision(&self) -> Result<Option<String>> {
        if !table_exists(self.conn, VERSION_TABLE)? {
            return Ok(None);
        }
        let revision = self
            .conn
            .query_row("SELECT revision FROM migraph_version WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Payload;
    use crate::storage::ApplicationLog;
    use chrono::Utc;

    fn owned(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn script(id: &str, parents: &[&str], upgrade: &[&str], downgrade: &[&str]) -> Script {
        Script::new(
            id.to_string(),
            owned(parents),
            Some("main".into()),
            String::new(),
            1,
            Utc::now(),
            Payload {
                upgrade: owned(upgrade),
                downgrade: owned(downgrade),
            },
        )
    }

    #[test]
    fn test_apply_runs_statements_moves_pointer_and_logs() {
        let conn = Connection::open_in_memory().unwrap();
        let mut engine = SqliteEngine::new(&conn);
        assert_eq!(engine.current_revision().unwrap(), None);

        let root = script("r1", &[], &["CREATE TABLE users (id INTEGER PRIMARY KEY)"], &[]);
        assert!(!engine.apply(&root).unwrap());
        assert_eq!(engine.current_revision().unwrap().as_deref(), Some("r1"));
        assert!(table_exists(&conn, "users").unwrap());

        let next = script("r2", &["r1"], &["ALTER TABLE users ADD COLUMN email TEXT"], &[]);
        assert!(engine.apply(&next).unwrap());
        assert_eq!(engine.current_revision().unwrap().as_deref(), Some("r2"));

        let entries = ApplicationLog::new(&conn).entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].previous_revision.as_deref(), Some("r1"));
        assert_eq!(entries[0].forward_revision, "r2");
    }

    #[test]
    fn test_failed_statement_rolls_back_step() {
        let conn = Connection::open_in_memory().unwrap();
        let mut engine = SqliteEngine::new(&conn);
        engine.apply(&script("r1", &[], &[], &[])).unwrap();

        let err = engine
            .apply(&script(
                "r2",
                &["r1"],
                &["CREATE TABLE t (id INTEGER)", "INSERT INTO missing VALUES (1)"],
                &[],
            ))
            .unwrap_err();

        assert!(matches!(err, Error::Execution { ref revision, .. } if revision == "r2"));
        assert_eq!(engine.current_revision().unwrap().as_deref(), Some("r1"));
        assert!(!table_exists(&conn, "t").unwrap());
        assert!(ApplicationLog::new(&conn).is_empty().unwrap());
    }

    #[test]
    fn test_failed_log_write_rolls_back_step() {
        let conn = Connection::open_in_memory().unwrap();
        let mut engine = SqliteEngine::new(&conn);
        engine.apply(&script("r1", &[], &[], &[])).unwrap();

        // Any insert into the log now fails
        conn.execute_batch(
            "CREATE TABLE migraph_version_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                previous_revision TEXT NOT NULL,
                forward_revision TEXT NOT NULL,
                UNIQUE (previous_revision, forward_revision)
            );
            CREATE TRIGGER log_locked BEFORE INSERT ON migraph_version_history
            BEGIN
                SELECT RAISE(ABORT, 'log locked');
            END;",
        )
        .unwrap();

        let err = engine
            .apply(&script("r2", &["r1"], &["CREATE TABLE t (id INTEGER)"], &[]))
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
        assert_eq!(engine.current_revision().unwrap().as_deref(), Some("r1"));
        assert!(!table_exists(&conn, "t").unwrap());
    }

    #[test]
    fn test_revert_runs_downgrade_and_drops_log_row() {
        let conn = Connection::open_in_memory().unwrap();
        let mut engine = SqliteEngine::new(&conn);
        let root = script("r1", &[], &["CREATE TABLE users (id INTEGER)"], &["DROP TABLE users"]);
        let next = script("r2", &["r1"], &["CREATE TABLE posts (id INTEGER)"], &["DROP TABLE posts"]);
        engine.apply(&root).unwrap();
        engine.apply(&next).unwrap();

        assert!(engine.revert(&next, Some("r1")).unwrap());
        assert_eq!(engine.current_revision().unwrap().as_deref(), Some("r1"));
        assert!(!table_exists(&conn, "posts").unwrap());
        assert!(ApplicationLog::new(&conn).is_empty().unwrap());

        assert!(!engine.revert(&root, None).unwrap());
        assert_eq!(engine.current_revision().unwrap(), None);
        assert!(!table_exists(&conn, "users").unwrap());
    }

    #[test]
    fn test_failed_downgrade_keeps_step() {
        let conn = Connection::open_in_memory().unwrap();
        let mut engine = SqliteEngine::new(&conn);
        engine.apply(&script("r1", &[], &[], &[])).unwrap();
        let broken = script("r2", &["r1"], &[], &["DROP TABLE missing"]);
        engine.apply(&broken).unwrap();

        let err = engine.revert(&broken, Some("r1")).unwrap_err();
        assert!(matches!(err, Error::Execution { ref revision, .. } if revision == "r2"));
        assert_eq!(engine.current_revision().unwrap().as_deref(), Some("r2"));
        assert_eq!(ApplicationLog::new(&conn).len().unwrap(), 1);
    }
}
