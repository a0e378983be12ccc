// Migraph: branch-aware schema migrations
//
// Migration scripts form a directed acyclic graph of revisions. Scripts
// carry the source-control branch they were written on, divergent heads
// are merged on operator request, and every applied transition is logged
// inside the target database for later comparison with the graph.

pub mod branch;
pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod merge;
pub mod output;
pub mod reconcile;
pub mod script;
pub mod storage;
pub mod upgrade;

pub use branch::{BranchProvider, BranchTagger, FixedBranch, GitBranchProvider};
pub use config::Config;
pub use error::{DivergenceField, Error, Result};
pub use graph::RevisionGraph;
pub use merge::{MergeCandidate, MergeOutcome, MergeResolver};
pub use reconcile::{HistoryReconciler, ReconcileReport};
pub use script::{Payload, Script, ScriptStore};
pub use storage::{ApplicationLog, DatabaseStatus, LogEntry, MigrationDb, SqliteEngine};
pub use upgrade::{DowngradeReport, ExecutionEngine, UpgradePlanner, UpgradeReport};
