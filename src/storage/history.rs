//! Application log: the durable record of applied transitions
//!
//! One row per (previous revision, forward revision) pair that was actually
//! executed. Rows are append-only and ordered by their autoincrement id.
//! The pair is unique, which makes appending idempotent.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use super::table_exists;
use crate::error::Result;

pub const HISTORY_TABLE: &str = "migraph_version_history";

/// Stored in `previous_revision` when there was no prior revision
pub const NO_REVISION: &str = "none";

/// One recorded transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub id: i64,
    /// `None` when the sentinel was recorded
    pub previous_revision: Option<String>,
    pub forward_revision: String,
}

impl LogEntry {
    /// Previous revision as stored, sentinel included
    pub fn previous_or_sentinel(&self) -> &str {
        self.previous_revision.as_deref().unwrap_or(NO_REVISION)
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<Version({}) {} -> {}>",
            self.id,
            self.previous_or_sentinel(),
            self.forward_revision
        )
    }
}

/// Log table accessor over a shared connection
#[derive(Debug, Clone, Copy)]
pub struct ApplicationLog<'c> {
    conn: &'c Connection,
}

impl<'c> ApplicationLog<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Record a transition unless the same pair is already present
    ///
    /// Returns true when a row was inserted. The check and the insert run
    /// in one transaction; the table is created on first use.
    pub fn append(&self, previous: Option<&str>, forward: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let inserted = append_within(&tx, previous, forward)?;
        tx.commit()?;
        Ok(inserted)
    }

    /// Drop the newest row leading to `forward`, as a downgrade does
    ///
    /// Returns true when a row was removed.
    pub fn remove(&self, forward: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let removed = remove_within(&tx, forward)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Every entry, oldest first; empty when nothing was ever logged
    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        if !table_exists(self.conn, HISTORY_TABLE)? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, previous_revision, forward_revision
             FROM migraph_version_history
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// A page of entries, newest first
    pub fn list(&self, offset: usize, limit: usize) -> Result<Vec<LogEntry>> {
        if !table_exists(self.conn, HISTORY_TABLE)? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, previous_revision, forward_revision
             FROM migraph_version_history
             ORDER BY id DESC
             LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(params![limit as i64, offset as i64], row_to_entry)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn len(&self) -> Result<usize> {
        if !table_exists(self.conn, HISTORY_TABLE)? {
            return Ok(0);
        }
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM migraph_version_history", [], |row| {
                    row.get(0)
                })?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn ensure_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migraph_version_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            previous_revision TEXT NOT NULL,
            forward_revision TEXT NOT NULL,
            UNIQUE (previous_revision, forward_revision)
        )",
    )?;
    Ok(())
}

/// Check-then-insert inside a transaction the caller owns
///
/// The execution engine uses this to commit a script and its log row
/// together.
pub(crate) fn append_within(
    conn: &Connection,
    previous: Option<&str>,
    forward: &str,
) -> Result<bool> {
    let previous = previous.unwrap_or(NO_REVISION);
    ensure_table(conn)?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM migraph_version_history
             WHERE previous_revision = ?1 AND forward_revision = ?2",
            params![previous, forward],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        debug!(id, previous, forward, "transition already logged");
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO migraph_version_history (previous_revision, forward_revision)
         VALUES (?1, ?2)",
        params![previous, forward],
    )?;
    debug!(previous, forward, "logged transition");
    Ok(true)
}

/// Delete the newest row whose forward revision is `forward`
pub(crate) fn remove_within(conn: &Connection, forward: &str) -> Result<bool> {
    if !table_exists(conn, HISTORY_TABLE)? {
        return Ok(false);
    }
    let removed = conn.execute(
        "DELETE FROM migraph_version_history
         WHERE id = (SELECT MAX(id) FROM migraph_version_history WHERE forward_revision = ?1)",
        params![forward],
    )?;
    if removed > 0 {
        debug!(forward, "removed logged transition");
    }
    Ok(removed > 0)
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LogEntry> {
    let previous: String = row.get(1)?;
    Ok(LogEntry {
        id: row.get(0)?,
        previous_revision: (previous != NO_REVISION).then_some(previous),
        forward_revision: row.get(2)?,
    })
}
