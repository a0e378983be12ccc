//! Reconciliation of the application log against the script graph
//!
//! The graph implies one expected history: its linearization, where each
//! non-root script contributes the transition (predecessor -> id). Roots
//! are applied to an empty database and leave no log row, so they are
//! skipped. The log must be a prefix of that sequence. A shorter log
//! means scripts are still pending; anything else is divergence.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{DivergenceField, Error, Result};
use crate::graph::RevisionGraph;
use crate::script::ScriptStore;
use crate::storage::{ApplicationLog, LogEntry};

/// A log entry that matched the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedEntry {
    pub index: usize,
    pub previous_revision: String,
    pub forward_revision: String,
}

/// Outcome of a successful reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub matched: Vec<MatchedEntry>,
    /// Expected transitions not yet in the log
    pub pending: usize,
}

/// Compares the persisted log with the graph on disk
#[derive(Debug, Clone, Copy)]
pub struct HistoryReconciler<'a> {
    store: &'a ScriptStore,
    log: &'a ApplicationLog<'a>,
}

impl<'a> HistoryReconciler<'a> {
    pub fn new(store: &'a ScriptStore, log: &'a ApplicationLog<'a>) -> Self {
        Self { store, log }
    }

    /// Fail with `Divergence` on the first disagreement
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let graph = self.store.graph()?;
        let entries = self.log.entries()?;
        compare_history(&graph, &entries)
    }
}

/// Pairwise comparison of `entries` with the graph's expected transitions
///
/// Roots have no predecessor and are skipped, so index 0 is the first
/// non-root script. With history `[r1, r2]` and a single logged entry
/// `(none, r2)`, the expected pair is `(r1, r2)` and the error is a
/// `PreviousRevision` divergence at index 0 (expected `r1`, found `none`).
/// Within an entry the previous revision is checked before the forward one.
/// Extra log rows diverge on `Length`; missing ones count as pending.
pub fn compare_history(graph: &RevisionGraph, entries: &[LogEntry]) -> Result<ReconcileReport> {
    let expected: Vec<(String, &str)> = graph
        .all_revisions_oldest_first()
        .into_iter()
        .filter_map(|script| script.predecessor().map(|p| (p, script.id())))
        .collect();

    let mut report = ReconcileReport::default();
    for (index, entry) in entries.iter().enumerate() {
        let Some((previous, forward)) = expected.get(index) else {
            return Err(diverged(
                index,
                DivergenceField::Length,
                "<end of history>".to_string(),
                entry.to_string(),
            ));
        };

        debug!(index, recorded = %entry, expected = forward, "comparing");
        if entry.previous_or_sentinel() != previous {
            return Err(diverged(
                index,
                DivergenceField::PreviousRevision,
                previous.clone(),
                entry.previous_or_sentinel().to_string(),
            ));
        }
        if entry.forward_revision != *forward {
            return Err(diverged(
                index,
                DivergenceField::ForwardRevision,
                forward.to_string(),
                entry.forward_revision.clone(),
            ));
        }

        report.matched.push(MatchedEntry {
            index,
            previous_revision: previous.clone(),
            forward_revision: forward.to_string(),
        });
    }

    report.pending = expected.len() - report.matched.len();
    Ok(report)
}

fn diverged(index: usize, field: DivergenceField, expected: String, actual: String) -> Error {
    warn!(index, %field, %expected, %actual, "application log diverges from script graph");
    Error::Divergence {
        index,
        field,
        expected,
        actual,
    }
}
