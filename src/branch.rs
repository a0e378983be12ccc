//! Branch tagging for scripts
//!
//! New scripts record the source-control branch that was active when they
//! were created. The tag is read back for head listings and to label merge
//! candidates.

use git2::Repository;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::script::Script;

/// Source of the active branch name
pub trait BranchProvider {
    /// Name of the currently checked-out branch, treated as an opaque string
    fn active_branch_name(&self) -> Result<String>;
}

/// Reads the active branch from a git repository
///
/// The repository is discovered from `repo_path` upwards, the same way
/// `git` itself finds it.
#[derive(Debug, Clone)]
pub struct GitBranchProvider {
    repo_path: PathBuf,
}

impl GitBranchProvider {
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }
}

impl BranchProvider for GitBranchProvider {
    fn active_branch_name(&self) -> Result<String> {
        let repo = Repository::discover(&self.repo_path).map_err(|e| {
            Error::BranchUnavailable(format!(
                "no git repository at {}: {}",
                self.repo_path.display(),
                e.message()
            ))
        })?;

        // Read HEAD's symbolic target rather than peeling it, so a branch
        // without commits yet still has a name.
        let head = repo.find_reference("HEAD")?;
        let target = head
            .symbolic_target()
            .ok_or_else(|| Error::BranchUnavailable("HEAD is detached".to_string()))?;

        Ok(target.strip_prefix("refs/heads/").unwrap_or(target).to_string())
    }
}

/// A branch name fixed up front
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedBranch(pub String);

impl BranchProvider for FixedBranch {
    fn active_branch_name(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Reads and writes branch tags
pub struct BranchTagger {
    provider: Box<dyn BranchProvider>,
}

impl BranchTagger {
    pub fn new(provider: Box<dyn BranchProvider>) -> Self {
        Self { provider }
    }

    /// Branch recorded on `script`, or its own id for untagged scripts
    ///
    /// Never empty, so listings and merge labels always have something
    /// to show.
    pub fn tag_for<'a>(&self, script: &'a Script) -> &'a str {
        tag_for(script)
    }

    /// Branch active right now, as reported by the provider
    pub fn current_branch(&self) -> Result<String> {
        self.provider.active_branch_name()
    }
}

impl std::fmt::Debug for BranchTagger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchTagger")
            .field("provider", &"<BranchProvider>")
            .finish()
    }
}

/// Branch tag with the self-id fallback, for callers without a tagger
pub fn tag_for(script: &Script) -> &str {
    script.branch().unwrap_or_else(|| script.id())
}
