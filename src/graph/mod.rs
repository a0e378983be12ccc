//! Revision graph over the script set
//!
//! Scripts are nodes and every parent reference becomes an edge
//! parent -> child. Nodes are inserted in creation order, so a node's
//! `NodeIndex` doubles as its creation rank and every tie-break below
//! compares indices, never id strings.
//!
//! The graph is a read-only view. It is rebuilt from the store at the
//! start of every top-level operation and never patched in place.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use petgraph::Direction;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::debug;

use crate::error::{Error, Result};
use crate::script::{validate_scripts, Script};

/// Directed acyclic graph of migration scripts
#[derive(Debug, Clone)]
pub struct RevisionGraph {
    graph: DiGraph<Script, ()>,
    index: HashMap<String, NodeIndex>,
}

impl RevisionGraph {
    /// Build the graph, rejecting missing parents, duplicates and cycles
    pub fn build(mut scripts: Vec<Script>) -> Result<Self> {
        validate_scripts(&scripts)?;
        scripts.sort_by(|a, b| a.creation_key().cmp(&b.creation_key()));

        let mut graph = DiGraph::with_capacity(scripts.len(), scripts.len());
        let mut index = HashMap::with_capacity(scripts.len());
        for script in scripts {
            let id = script.id().to_string();
            let node = graph.add_node(script);
            index.insert(id, node);
        }

        let mut edges = Vec::with_capacity(graph.node_count());
        for child in graph.node_indices() {
            for parent in graph[child].parents() {
                edges.push((index[parent.as_str()], child));
            }
        }
        for (parent, child) in edges {
            graph.add_edge(parent, child, ());
        }

        if let Err(cycle) = petgraph::algo::toposort(&graph, None) {
            return Err(Error::GraphCorruption(format!(
                "revision {} is part of a cycle",
                graph[cycle.node_id()].id()
            )));
        }

        debug!(
            scripts = graph.node_count(),
            edges = graph.edge_count(),
            "built revision graph"
        );
        Ok(Self { graph, index })
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn get(&self, id: &str) -> Option<&Script> {
        self.index.get(id).map(|&n| &self.graph[n])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All scripts in creation order
    pub fn scripts(&self) -> impl Iterator<Item = &Script> {
        self.graph.node_indices().map(move |n| &self.graph[n])
    }

    /// Scripts no other script names as parent, in creation order
    ///
    /// Empty only for an empty graph. More than one head means the
    /// branches have diverged and need a merge.
    pub fn heads(&self) -> Vec<&Script> {
        self.graph
            .node_indices()
            .filter(|&n| {
                self.graph
                    .neighbors_directed(n, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .map(|n| &self.graph[n])
            .collect()
    }

    /// Scripts without parents, in creation order
    pub fn roots(&self) -> Vec<&Script> {
        self.graph
            .node_indices()
            .filter(|&n| self.graph[n].is_root())
            .map(|n| &self.graph[n])
            .collect()
    }

    /// Direct children of a script, in creation order
    pub fn children(&self, id: &str) -> Result<Vec<&Script>> {
        let node = self.node(id)?;
        let mut children: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        children.sort();
        Ok(children.into_iter().map(|n| &self.graph[n]).collect())
    }

    /// True when `ancestor` lies on some parent chain of `descendant`
    ///
    /// A revision counts as its own ancestor.
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let a = self.node(ancestor)?;
        let d = self.node(descendant)?;
        Ok(self.ancestors_of(d).contains(&a))
    }

    /// Scripts on every path from `to` back to `from`, oldest first
    ///
    /// That is every ancestor of `to` (and `to` itself) that descends from
    /// `from`, with `from` excluded. All parent edges of merge scripts are
    /// followed. `None` stands for an empty database, in which case the
    /// whole ancestry of `to` is returned.
    pub fn ancestors_between(&self, from: Option<&str>, to: &str) -> Result<Vec<&Script>> {
        let target = self.node(to)?;
        if from == Some(to) {
            return Ok(Vec::new());
        }

        let mut wanted = self.ancestors_of(target);
        if let Some(from) = from {
            let start = self.node(from)?;
            if !wanted.contains(&start) {
                return Err(Error::UnreachableRevision {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            let below = self.descendants_of(start);
            wanted.retain(|n| *n != start && below.contains(n));
        }

        Ok(self.linearize(&wanted))
    }

    /// Linearize an arbitrary set of revisions, oldest first
    pub fn oldest_first<'s, I>(&self, ids: I) -> Result<Vec<&Script>>
    where
        I: IntoIterator<Item = &'s str>,
    {
        let subset = ids
            .into_iter()
            .map(|id| self.node(id))
            .collect::<Result<HashSet<NodeIndex>>>()?;
        Ok(self.linearize(&subset))
    }

    /// Topological order of the whole graph, oldest first
    ///
    /// Among scripts whose parents are all placed, the one created first
    /// goes next. The result is stable for a given graph.
    pub fn all_revisions_oldest_first(&self) -> Vec<&Script> {
        let everything: HashSet<NodeIndex> = self.graph.node_indices().collect();
        self.linearize(&everything)
    }

    /// Newest script of the linearization
    pub fn last_revision(&self) -> Option<&Script> {
        self.all_revisions_oldest_first().pop()
    }

    /// Window of at most `limit` scripts from either end of the history
    ///
    /// `newest_first` returns the most recent scripts, newest at the front.
    pub fn history(&self, limit: usize, newest_first: bool) -> Vec<&Script> {
        let mut all = self.all_revisions_oldest_first();
        if newest_first {
            all.reverse();
        }
        all.truncate(limit);
        all
    }

    fn node(&self, id: &str) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| Error::UnknownRevision(id.to_string()))
    }

    /// `start` and everything reachable through parent edges
    fn ancestors_of(&self, start: NodeIndex) -> HashSet<NodeIndex> {
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        let mut seen = HashSet::new();
        while let Some(node) = dfs.next(reversed) {
            seen.insert(node);
        }
        seen
    }

    /// `start` and everything reachable through child edges
    fn descendants_of(&self, start: NodeIndex) -> HashSet<NodeIndex> {
        let mut dfs = Dfs::new(&self.graph, start);
        let mut seen = HashSet::new();
        while let Some(node) = dfs.next(&self.graph) {
            seen.insert(node);
        }
        seen
    }

    /// Kahn's algorithm over `subset`, lowest creation rank first
    fn linearize(&self, subset: &HashSet<NodeIndex>) -> Vec<&Script> {
        let mut unresolved: HashMap<NodeIndex, usize> = subset
            .iter()
            .map(|&n| {
                let parents = self
                    .graph
                    .neighbors_directed(n, Direction::Incoming)
                    .filter(|p| subset.contains(p))
                    .count();
                (n, parents)
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<NodeIndex>> = unresolved
            .iter()
            .filter(|&(_, &count)| count == 0)
            .map(|(&n, _)| Reverse(n))
            .collect();

        let mut order = Vec::with_capacity(subset.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(&self.graph[node]);
            for child in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(count) = unresolved.get_mut(&child) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(Reverse(child));
                    }
                }
            }
        }
        order
    }
}
