//! Explicit configuration threaded into each component
//!
//! Every path resolves with priority: CLI arg > environment variable >
//! default. Components receive only the piece they need.

use std::path::PathBuf;

use crate::branch::GitBranchProvider;
use crate::error::Result;
use crate::script::ScriptStore;
use crate::storage::MigrationDb;

pub const ENV_SCRIPT_DIR: &str = "MIGRAPH_DIR";
pub const ENV_DATABASE: &str = "MIGRAPH_DB";
pub const ENV_REPO: &str = "MIGRAPH_REPO";

pub const DEFAULT_SCRIPT_DIR: &str = "./migrations";
pub const DEFAULT_DATABASE: &str = "./migraph.db";
pub const DEFAULT_REPO: &str = ".";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Script directory (holds `versions/`)
    pub script_dir: PathBuf,
    /// Target SQLite database
    pub database: PathBuf,
    /// Where to look for the git repository
    pub repo: PathBuf,
}

impl Config {
    pub fn resolve(
        script_dir: Option<PathBuf>,
        database: Option<PathBuf>,
        repo: Option<PathBuf>,
    ) -> Self {
        Self {
            script_dir: resolve_path(script_dir, ENV_SCRIPT_DIR, DEFAULT_SCRIPT_DIR),
            database: resolve_path(database, ENV_DATABASE, DEFAULT_DATABASE),
            repo: resolve_path(repo, ENV_REPO, DEFAULT_REPO),
        }
    }

    pub fn store(&self) -> ScriptStore {
        ScriptStore::new(&self.script_dir)
    }

    pub fn open_db(&self) -> Result<MigrationDb> {
        MigrationDb::open(&self.database)
    }

    pub fn branch_provider(&self) -> GitBranchProvider {
        GitBranchProvider::new(&self.repo)
    }
}

/// Resolve one path from the CLI value, then `env_key`, then `default`
pub fn resolve_path(cli: Option<PathBuf>, env_key: &str, default: &str) -> PathBuf {
    match cli {
        Some(path) => path,
        None => std::env::var_os(env_key)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(default)),
    }
}
