//! Migration scripts and the on-disk store that owns them
//!
//! A script directory looks like:
//!
//! ```text
//! migrations/
//! ├── README
//! └── versions/
//!     ├── 3f9a1c0be27d_create_users.json
//!     └── 8b21e4d09a5f_add_email_index.json
//! ```
//!
//! Each descriptor carries the revision id, its parent ids, the branch tag
//! recorded at creation, a store-assigned creation sequence, and the opaque
//! upgrade/downgrade payload that only the execution engine interprets.

pub mod template;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::graph::RevisionGraph;

/// Name of the subdirectory holding descriptor files
pub const VERSIONS_DIR: &str = "versions";

/// Length of a generated revision id, in hex characters
pub const REVISION_ID_LEN: usize = 12;

/// Upgrade and downgrade statements of a script
///
/// The graph engine never looks inside; the execution engine does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub upgrade: Vec<String>,
    #[serde(default)]
    pub downgrade: Vec<String>,
}

/// A single migration unit: one node of the revision graph
///
/// Fields are written once, at construction, and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    id: String,
    parents: Vec<String>,
    branch: Option<String>,
    message: String,
    sequence: u64,
    created_at: DateTime<Utc>,
    payload: Payload,
    path: Option<PathBuf>,
}

impl Script {
    pub(crate) fn new(
        id: String,
        parents: Vec<String>,
        branch: Option<String>,
        message: String,
        sequence: u64,
        created_at: DateTime<Utc>,
        payload: Payload,
    ) -> Self {
        Self {
            id,
            parents,
            branch,
            message,
            sequence,
            created_at,
            payload,
            path: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Parent ids in stored order
    pub fn parents(&self) -> &[String] {
        &self.parents
    }

    /// Branch tag as recorded, `None` for legacy untagged scripts
    ///
    /// Use `BranchTagger::tag_for` for the display value with fallback.
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Descriptor file this script was loaded from or written to
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// Revision recorded as `previous_revision` when this script is applied
    ///
    /// The parent id, or all parent ids joined with `,` for a merge.
    /// Roots have no predecessor and are never logged.
    pub fn predecessor(&self) -> Option<String> {
        if self.parents.is_empty() {
            None
        } else {
            Some(self.parents.join(","))
        }
    }

    /// Ordering key for creation order
    ///
    /// `sequence` collides when two branches create scripts independently,
    /// so the timestamp breaks the tie before the id does.
    pub(crate) fn creation_key(&self) -> (u64, DateTime<Utc>, &str) {
        (self.sequence, self.created_at, &self.id)
    }
}

impl std::fmt::Display for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.parents.is_empty() {
            write!(f, "<base> -> {}", self.id)?;
        } else {
            write!(f, "{} -> {}", self.parents.join(", "), self.id)?;
        }
        if self.is_merge() {
            write!(f, " (mergepoint)")?;
        }
        if !self.message.is_empty() {
            write!(f, ", {}", self.message)?;
        }
        Ok(())
    }
}

/// Parent field as written on disk: absent, a single id, or a list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ParentRefs {
    One(String),
    Many(Vec<String>),
}

/// Serialized form of a script
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScriptDescriptor {
    id: String,
    #[serde(default)]
    parents: Option<ParentRefs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    sequence: u64,
    #[serde(default)]
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    payload: Payload,
}

impl ScriptDescriptor {
    fn from_script(script: &Script) -> Self {
        let parents = match script.parents.as_slice() {
            [] => None,
            [one] => Some(ParentRefs::One(one.clone())),
            many => Some(ParentRefs::Many(many.to_vec())),
        };
        Self {
            id: script.id.clone(),
            parents,
            branch: script.branch.clone(),
            message: script.message.clone(),
            sequence: script.sequence,
            created_at: script.created_at,
            payload: script.payload.clone(),
        }
    }

    fn into_script(self, path: PathBuf) -> Script {
        let parents = match self.parents {
            None => Vec::new(),
            Some(ParentRefs::One(id)) => vec![id],
            Some(ParentRefs::Many(ids)) => ids,
        };
        // An empty tag is the same as no tag
        let branch = self.branch.filter(|b| !b.is_empty());
        Script {
            id: self.id,
            parents,
            branch,
            message: self.message,
            sequence: self.sequence,
            created_at: self.created_at,
            payload: self.payload,
            path: Some(path),
        }
    }
}

/// Check the structural invariants of a script set
///
/// Ids must be unique and non-empty and every parent must be present.
/// Cycle detection happens when the graph is built.
pub(crate) fn validate_scripts(scripts: &[Script]) -> Result<()> {
    let mut seen = HashSet::new();
    for script in scripts {
        if script.id.is_empty() {
            return Err(Error::GraphCorruption(format!(
                "script {} has an empty id",
                describe_origin(script)
            )));
        }
        if !seen.insert(script.id.as_str()) {
            return Err(Error::GraphCorruption(format!(
                "duplicate revision id {}",
                script.id
            )));
        }
    }

    for script in scripts {
        let mut own = HashSet::new();
        for parent in &script.parents {
            if parent == &script.id {
                return Err(Error::GraphCorruption(format!(
                    "revision {} names itself as parent",
                    script.id
                )));
            }
            if !own.insert(parent.as_str()) {
                return Err(Error::GraphCorruption(format!(
                    "revision {} lists parent {} twice",
                    script.id, parent
                )));
            }
            if !seen.contains(parent.as_str()) {
                return Err(Error::GraphCorruption(format!(
                    "revision {} references missing parent {}",
                    script.id, parent
                )));
            }
        }
    }

    Ok(())
}

fn describe_origin(script: &Script) -> String {
    script
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<memory>".to_string())
}

/// On-disk collection of migration scripts
///
/// Owns descriptor construction and persistence. Every call reads the
/// directory afresh; nothing is cached between operations.
#[derive(Debug, Clone)]
pub struct ScriptStore {
    dir: PathBuf,
}

impl ScriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.dir.join(VERSIONS_DIR)
    }

    pub fn is_initialized(&self) -> bool {
        self.versions_dir().is_dir()
    }

    /// Materialize an empty store from a built-in template
    pub fn initialize(&self, template_name: &str) -> Result<()> {
        template::materialize(&self.dir, template_name)?;
        info!(dir = %self.dir.display(), template = template_name, "initialized script store");
        Ok(())
    }

    /// Parse every descriptor, validated and in creation order
    pub fn load(&self) -> Result<Vec<Script>> {
        let versions = self.versions_dir();
        if !versions.is_dir() {
            return Err(Error::DirectoryMissing(self.dir.clone()));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&versions)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().map_or(false, |e| e == "json"))
            .collect();
        files.sort();

        let mut scripts = Vec::with_capacity(files.len());
        for path in files {
            let text = fs::read_to_string(&path)?;
            let descriptor: ScriptDescriptor = serde_json::from_str(&text)
                .map_err(|source| Error::Descriptor { path: path.clone(), source })?;
            scripts.push(descriptor.into_script(path));
        }

        validate_scripts(&scripts)?;
        scripts.sort_by(|a, b| a.creation_key().cmp(&b.creation_key()));

        debug!(count = scripts.len(), dir = %versions.display(), "loaded scripts");
        Ok(scripts)
    }

    /// Load the scripts and build a fresh graph over them
    pub fn graph(&self) -> Result<RevisionGraph> {
        RevisionGraph::build(self.load()?)
    }

    /// Create a script on top of the current head
    ///
    /// With no scripts yet, the new script is a root. With two or more
    /// heads the caller must merge first.
    pub fn create(&self, name: &str, branch: &str) -> Result<Script> {
        let graph = self.graph()?;
        let heads = graph.heads();
        if heads.len() > 1 {
            return Err(Error::AmbiguousHead { count: heads.len() });
        }
        let parents = heads.iter().map(|s| s.id().to_string()).collect();
        self.write_new(&graph, name, branch, parents)
    }

    /// Create a script with explicit parents (used for merge scripts)
    pub(crate) fn create_with_parents(
        &self,
        name: &str,
        branch: &str,
        parents: Vec<String>,
    ) -> Result<Script> {
        let graph = self.graph()?;
        for parent in &parents {
            if graph.get(parent).is_none() {
                return Err(Error::UnknownRevision(parent.clone()));
            }
        }
        self.write_new(&graph, name, branch, parents)
    }

    fn write_new(
        &self,
        graph: &RevisionGraph,
        name: &str,
        branch: &str,
        parents: Vec<String>,
    ) -> Result<Script> {
        let sequence = graph.scripts().map(Script::sequence).max().unwrap_or(0) + 1;
        let created_at = Utc::now();

        let mut salt = 0u32;
        let id = loop {
            let candidate = allocate_id(name, branch, sequence, created_at, salt);
            if graph.get(&candidate).is_none() {
                break candidate;
            }
            salt += 1;
        };

        let mut script = Script::new(
            id,
            parents,
            Some(branch.to_string()),
            name.to_string(),
            sequence,
            created_at,
            Payload::default(),
        );

        let path = self
            .versions_dir()
            .join(format!("{}_{}.json", script.id, slugify(name)));
        let json = serde_json::to_string_pretty(&ScriptDescriptor::from_script(&script))
            .map_err(|source| Error::Descriptor { path: path.clone(), source })?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;

        script.path = Some(path);
        info!(
            revision = script.id(),
            parents = ?script.parents(),
            branch,
            "created script"
        );
        Ok(script)
    }
}

/// Derive a fresh revision id from the creation inputs
fn allocate_id(
    name: &str,
    branch: &str,
    sequence: u64,
    created_at: DateTime<Utc>,
    salt: u32,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(&[0]);
    hasher.update(branch.as_bytes());
    hasher.update(&[0]);
    hasher.update(&sequence.to_le_bytes());
    hasher.update(&created_at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&salt.to_le_bytes());
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..REVISION_ID_LEN].to_string()
}

/// File-name friendly form of a script message
fn slugify(name: &str) -> String {
    let slug: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .take(40)
        .collect();
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "revision".to_string()
    } else {
        slug.to_string()
    }
}

/// Build an in-memory script for unit tests
#[cfg(test)]
pub(crate) fn fixture(id: &str, parents: &[&str], branch: Option<&str>, sequence: u64) -> Script {
    Script::new(
        id.to_string(),
        parents.iter().map(|p| p.to_string()).collect(),
        branch.map(str::to_string),
        format!("{} message", id),
        sequence,
        DateTime::<Utc>::default(),
        Payload::default(),
    )
}
