//! Error types shared by every migraph component
//!
//! Each variant is fatal to the call that produced it. The only local
//! recovery is re-prompting the operator on `NotAnInteger` and
//! `IndexOutOfRange` during merge selection.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the revision graph engine and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed script set: missing parent, duplicate id, cycle
    #[error("script graph is corrupt: {0}")]
    GraphCorruption(String),

    /// The script directory has not been initialized
    #[error("migration directory not found: {}", .0.display())]
    DirectoryMissing(PathBuf),

    /// `initialize` was pointed at an existing location
    #[error("directory {} already exists", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("no such template {0:?}")]
    UnknownTemplate(String),

    /// A revision id that no script carries
    #[error("unknown revision {0}")]
    UnknownRevision(String),

    /// `from` is not an ancestor of `to`
    #[error("revision {to} is not reachable from {from}")]
    UnreachableRevision { from: String, to: String },

    /// Upgrade or create attempted while the graph has several heads
    #[error("there are {count} heads; merge migrations first")]
    AmbiguousHead { count: usize },

    /// Merge selection outside `[1, count]`
    #[error("choice must be between 1 and {count}, got {value}")]
    IndexOutOfRange { value: i64, count: usize },

    /// Merge selection that does not parse as an integer
    #[error("choice must be an integer, got {0:?}")]
    NotAnInteger(String),

    /// The application log disagrees with the script graph
    #[error("history diverges at index {index}: expected {field} `{expected}`, found `{actual}`")]
    Divergence {
        index: usize,
        field: DivergenceField,
        expected: String,
        actual: String,
    },

    /// The source-control collaborator could not name the active branch
    #[error("active branch unavailable: {0}")]
    BranchUnavailable(String),

    /// The execution engine failed to apply a script
    #[error("failed to apply revision {revision}: {message}")]
    Execution { revision: String, message: String },

    /// A descriptor file could not be parsed
    #[error("invalid script descriptor {}: {source}", .path.display())]
    Descriptor {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

/// Which part of a log entry disagreed with the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceField {
    PreviousRevision,
    ForwardRevision,
    /// The log records more transitions than the graph implies
    Length,
}

impl std::fmt::Display for DivergenceField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DivergenceField::PreviousRevision => write!(f, "previous revision"),
            DivergenceField::ForwardRevision => write!(f, "forward revision"),
            DivergenceField::Length => write!(f, "end of history"),
        }
    }
}

impl Error {
    /// True for bad operator input that should be answered with a re-prompt
    pub fn is_recoverable_input(&self) -> bool {
        matches!(self, Error::NotAnInteger(_) | Error::IndexOutOfRange { .. })
    }
}
