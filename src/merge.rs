//! Operator-driven merging of divergent heads
//!
//! Every distinct pair of heads is a candidate. The operator picks one by
//! its 1-based position and a merge script with both heads as parents is
//! written. Nothing is merged automatically, not even when a single
//! candidate exists.
//!
//! Parent order of the merge script is fixed: the second head of the pair
//! comes first, then the first head. The label reads
//! `merge_<first>_into_<second>`, so the second head is the line being
//! merged into.

use serde::Serialize;
use std::io::{self, Write};
use tracing::info;

use crate::branch::BranchTagger;
use crate::error::{Error, Result};
use crate::script::{Script, ScriptStore};

/// One selectable pair of heads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCandidate {
    /// 1-based position in the presented list
    pub choice: usize,
    pub first: Script,
    pub second: Script,
}

impl MergeCandidate {
    /// Parent ids of the merge script this candidate produces
    pub fn merge_parents(&self) -> Vec<String> {
        vec![self.second.id().to_string(), self.first.id().to_string()]
    }
}

/// Serializable view of a candidate for JSON output
#[derive(Debug, Clone, Serialize)]
pub struct CandidateView {
    pub choice: usize,
    pub first: String,
    pub first_branch: String,
    pub second: String,
    pub second_branch: String,
}

/// Result of a merge request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Fewer than two heads
    NothingToMerge,
    /// The merge script that was written
    Merged(Script),
}

/// Every unordered pair of `heads`, in head order
///
/// For heads `[h0, h1, h2]` the pairs are `(h0,h1)`, `(h0,h2)`, `(h1,h2)`.
pub fn enumerate_merge_candidates(heads: &[&Script]) -> Vec<MergeCandidate> {
    let mut candidates = Vec::new();
    for (i, first) in heads.iter().enumerate() {
        for second in &heads[i + 1..] {
            candidates.push(MergeCandidate {
                choice: candidates.len() + 1,
                first: (*first).clone(),
                second: (*second).clone(),
            });
        }
    }
    candidates
}

/// Parse operator input into a 1-based candidate position
pub fn parse_selection(input: &str, count: usize) -> Result<usize> {
    let trimmed = input.trim();
    let value: i64 = trimmed
        .parse()
        .map_err(|_| Error::NotAnInteger(trimmed.to_string()))?;
    if value < 1 || value as u64 > count as u64 {
        return Err(Error::IndexOutOfRange { value, count });
    }
    Ok(value as usize)
}

/// Enumerates, presents and applies head merges
#[derive(Debug)]
pub struct MergeResolver<'a> {
    store: &'a ScriptStore,
    tagger: &'a BranchTagger,
}

impl<'a> MergeResolver<'a> {
    pub fn new(store: &'a ScriptStore, tagger: &'a BranchTagger) -> Self {
        Self { store, tagger }
    }

    /// Candidates for the heads currently on disk
    pub fn candidates(&self) -> Result<Vec<MergeCandidate>> {
        let graph = self.store.graph()?;
        Ok(enumerate_merge_candidates(&graph.heads()))
    }

    /// Write one line per candidate: `<n>) <first branch> -> <second branch>`
    pub fn present(&self, candidates: &[MergeCandidate], out: &mut dyn Write) -> io::Result<()> {
        for candidate in candidates {
            writeln!(
                out,
                "{}) {} -> {}",
                candidate.choice,
                self.tagger.tag_for(&candidate.first),
                self.tagger.tag_for(&candidate.second)
            )?;
        }
        Ok(())
    }

    pub fn views(&self, candidates: &[MergeCandidate]) -> Vec<CandidateView> {
        candidates
            .iter()
            .map(|c| CandidateView {
                choice: c.choice,
                first: c.first.id().to_string(),
                first_branch: self.tagger.tag_for(&c.first).to_string(),
                second: c.second.id().to_string(),
                second_branch: self.tagger.tag_for(&c.second).to_string(),
            })
            .collect()
    }

    /// Merge the pair the operator typed in
    ///
    /// Candidates are derived again from disk, so the selection is checked
    /// against the heads as they are now rather than when they were shown.
    pub fn resolve(&self, selection: &str) -> Result<MergeOutcome> {
        let candidates = self.candidates()?;
        if candidates.is_empty() {
            info!("nothing to merge");
            return Ok(MergeOutcome::NothingToMerge);
        }
        let choice = parse_selection(selection, candidates.len())?;
        self.merge(&candidates[choice - 1]).map(MergeOutcome::Merged)
    }

    /// Merge the pair at a 1-based position
    pub fn resolve_index(&self, choice: usize) -> Result<MergeOutcome> {
        let candidates = self.candidates()?;
        if candidates.is_empty() {
            info!("nothing to merge");
            return Ok(MergeOutcome::NothingToMerge);
        }
        if choice < 1 || choice > candidates.len() {
            return Err(Error::IndexOutOfRange {
                value: choice as i64,
                count: candidates.len(),
            });
        }
        self.merge(&candidates[choice - 1]).map(MergeOutcome::Merged)
    }

    fn merge(&self, candidate: &MergeCandidate) -> Result<Script> {
        let first_tag = self.tagger.tag_for(&candidate.first);
        let second_tag = self.tagger.tag_for(&candidate.second);
        let label = format!("merge_{}_into_{}", first_tag, second_tag);
        let message = format!(
            "merge {} ({}) into {} ({})",
            candidate.first.id(),
            first_tag,
            candidate.second.id(),
            second_tag
        );

        let script = self
            .store
            .create_with_parents(&message, &label, candidate.merge_parents())?;
        info!(
            revision = script.id(),
            first = candidate.first.id(),
            second = candidate.second.id(),
            "merged heads"
        );
        Ok(script)
    }
}
