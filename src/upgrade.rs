//! Upgrade and downgrade planning and execution
//!
//! The planner decides which scripts to run and in what order. Running a
//! script is delegated to an `ExecutionEngine`, which commits the script,
//! the pointer move and the log row as one step. A failure stops the run
//! where it is. Steps that already committed stay committed and nothing is
//! retried.
//!
//! The pointer alone cannot say which side of a fork already ran, so the
//! applied set is the pointer's ancestry plus every revision the log
//! records. Scripts in that set are never scheduled again.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::graph::RevisionGraph;
use crate::script::{Script, ScriptStore};
use crate::storage::{ApplicationLog, NO_REVISION};

/// Runs individual scripts against the live database
pub trait ExecutionEngine {
    /// Apply one script, advance the pointer and log the transition
    ///
    /// All three commit together. Returns true when a log row was inserted;
    /// roots have no predecessor and are not logged.
    fn apply(&mut self, script: &Script) -> Result<bool>;

    /// Run the downgrade statements of an applied script
    ///
    /// Moves the pointer to `pointer` (clears it for `None`) and drops the
    /// log row leading to the script, in one unit. Returns true when a log
    /// row was removed.
    fn revert(&mut self, script: &Script, pointer: Option<&str>) -> Result<bool>;

    /// Last applied revision, `None` for an untouched database
    fn current_revision(&self) -> Result<Option<String>>;
}

/// What an upgrade run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpgradeReport {
    pub from: Option<String>,
    pub to: Option<String>,
    /// Applied revisions in order
    pub applied: Vec<String>,
    /// Log rows actually inserted
    pub logged: usize,
}

impl UpgradeReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// What a downgrade run did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DowngradeReport {
    pub from: Option<String>,
    pub to: Option<String>,
    /// Reverted revisions, newest first
    pub reverted: Vec<String>,
    /// Log rows removed
    pub unlogged: usize,
}

impl DowngradeReport {
    pub fn is_noop(&self) -> bool {
        self.reverted.is_empty()
    }
}

/// Computes and executes upgrade paths
#[derive(Debug, Clone, Copy)]
pub struct UpgradePlanner<'a> {
    store: &'a ScriptStore,
}

impl<'a> UpgradePlanner<'a> {
    pub fn new(store: &'a ScriptStore) -> Self {
        Self { store }
    }

    /// Scripts on the paths from `current` to `target`, oldest first
    ///
    /// `current` itself and anything not descending from it are left out.
    /// Empty when `current == target`. Fails with `AmbiguousHead` while the
    /// graph has more than one head.
    pub fn plan(&self, current: Option<&str>, target: &str) -> Result<Vec<Script>> {
        let graph = self.store.graph()?;
        ensure_single_head(&graph)?;
        Ok(graph
            .ancestors_between(current, target)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Scripts the single head needs that the database has not run yet
    ///
    /// Empty for an empty graph.
    pub fn pending(&self, current: Option<&str>, log: &ApplicationLog<'_>) -> Result<Vec<Script>> {
        let graph = self.store.graph()?;
        let Some(head) = single_head(&graph)? else {
            return Ok(Vec::new());
        };
        let applied = applied_set(&graph, current, log)?;
        Ok(graph
            .ancestors_between(None, head.id())?
            .into_iter()
            .filter(|s| !applied.contains(s.id()))
            .cloned()
            .collect())
    }

    /// Apply `plan` in order
    ///
    /// `start` is the revision the database is at before the first script.
    pub fn execute_upgrade(
        &self,
        plan: &[Script],
        start: Option<&str>,
        engine: &mut dyn ExecutionEngine,
    ) -> Result<UpgradeReport> {
        let mut report = UpgradeReport {
            from: start.map(str::to_string),
            to: start.map(str::to_string),
            ..UpgradeReport::default()
        };

        for script in plan {
            match engine.apply(script) {
                Ok(logged) => {
                    if logged {
                        report.logged += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        revision = script.id(),
                        applied = report.applied.len(),
                        remaining = plan.len() - report.applied.len(),
                        "upgrade stopped"
                    );
                    return Err(e);
                }
            }

            info!(revision = script.id(), message = script.message(), "applied");
            report.applied.push(script.id().to_string());
            report.to = Some(script.id().to_string());
        }

        Ok(report)
    }

    /// Bring the database up to the single head
    pub fn upgrade(
        &self,
        engine: &mut dyn ExecutionEngine,
        log: &ApplicationLog<'_>,
    ) -> Result<UpgradeReport> {
        let current = engine.current_revision()?;
        let plan = self.pending(current.as_deref(), log)?;
        if plan.is_empty() {
            info!(current = ?current, "database is up to date");
        }
        self.execute_upgrade(&plan, current.as_deref(), engine)
    }

    /// Revert every applied script that `target` does not depend on
    ///
    /// `None` reverts everything. Scripts are reverted newest first and the
    /// pointer follows the newest script still applied. A target that was
    /// never applied fails with `UnreachableRevision`.
    pub fn downgrade(
        &self,
        target: Option<&str>,
        engine: &mut dyn ExecutionEngine,
        log: &ApplicationLog<'_>,
    ) -> Result<DowngradeReport> {
        let graph = self.store.graph()?;
        let current = engine.current_revision()?;
        let applied = applied_set(&graph, current.as_deref(), log)?;

        let keep: HashSet<&str> = match target {
            Some(target) if !applied.contains(target) => {
                return Err(Error::UnreachableRevision {
                    from: current.unwrap_or_else(|| NO_REVISION.to_string()),
                    to: target.to_string(),
                });
            }
            Some(target) => graph
                .ancestors_between(None, target)?
                .into_iter()
                .map(Script::id)
                .collect(),
            None => HashSet::new(),
        };

        let mut remaining = graph.oldest_first(applied.iter().copied())?;
        let mut report = DowngradeReport {
            from: current.clone(),
            to: current,
            ..DowngradeReport::default()
        };

        while let Some(position) = remaining.iter().rposition(|s| !keep.contains(s.id())) {
            let script = remaining.remove(position);
            let pointer = remaining.last().map(|s| s.id());
            match engine.revert(script, pointer) {
                Ok(unlogged) => {
                    if unlogged {
                        report.unlogged += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        revision = script.id(),
                        reverted = report.reverted.len(),
                        "downgrade stopped"
                    );
                    return Err(e);
                }
            }

            info!(revision = script.id(), message = script.message(), "reverted");
            report.reverted.push(script.id().to_string());
            report.to = pointer.map(str::to_string);
        }

        if report.is_noop() {
            info!(to = ?target, "nothing to revert");
        }
        Ok(report)
    }
}

/// Revisions already run against the database
///
/// Everything up to the pointer, plus each forward revision in the log that
/// the graph still knows. Roots are never logged, so they only count
/// through the pointer's ancestry.
fn applied_set<'g>(
    graph: &'g RevisionGraph,
    current: Option<&str>,
    log: &ApplicationLog<'_>,
) -> Result<HashSet<&'g str>> {
    let mut applied: HashSet<&str> = match current {
        Some(current) => graph
            .ancestors_between(None, current)?
            .into_iter()
            .map(Script::id)
            .collect(),
        None => HashSet::new(),
    };
    for entry in log.entries()? {
        if let Some(script) = graph.get(&entry.forward_revision) {
            applied.insert(script.id());
        }
    }
    Ok(applied)
}

fn single_head(graph: &RevisionGraph) -> Result<Option<&Script>> {
    let heads = graph.heads();
    match heads.len() {
        0 => Ok(None),
        1 => Ok(heads.into_iter().next()),
        count => Err(Error::AmbiguousHead { count }),
    }
}

fn ensure_single_head(graph: &RevisionGraph) -> Result<()> {
    single_head(graph).map(|_| ())
}
