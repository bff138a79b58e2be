//! Dependency graph construction from execution table entries.
//!
//! Entries are keyed by normalized seq, so `"01"` and `"1"` name the same node
//! and `"1"` and `"10"` never collide.

use crate::errors::DagError;
use crate::plan::types::{ExecutionTableEntry, normalize_seq};
use std::collections::{HashMap, HashSet};

/// Index into the entry list.
pub type EntryIndex = usize;

/// A dependency graph over execution table entries.
#[derive(Debug)]
pub struct EntryGraph {
    /// Seq values as written, by index
    seqs: Vec<String>,
    /// Normalized seq -> index
    index_map: HashMap<String, EntryIndex>,
    /// index -> entries that depend on it
    forward_edges: Vec<Vec<EntryIndex>>,
    /// index -> entries it depends on
    reverse_edges: Vec<Vec<EntryIndex>>,
}

impl EntryGraph {
    pub fn len(&self) -> usize {
        self.seqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seqs.is_empty()
    }

    pub fn seq(&self, index: EntryIndex) -> Option<&str> {
        self.seqs.get(index).map(|s| s.as_str())
    }

    pub fn get_index(&self, seq: &str) -> Option<EntryIndex> {
        self.index_map.get(&normalize_seq(seq)).copied()
    }

    /// Entries that depend on the given entry.
    pub fn dependents(&self, index: EntryIndex) -> &[EntryIndex] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Entries the given entry depends on.
    pub fn dependencies(&self, index: EntryIndex) -> &[EntryIndex] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Entries with no dependencies.
    pub fn roots(&self) -> Vec<EntryIndex> {
        self.reverse_edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Every entry reachable through dependent edges, in index order.
    pub fn transitive_dependents(&self, index: EntryIndex) -> Vec<EntryIndex> {
        let mut seen = HashSet::new();
        let mut stack = vec![index];
        while let Some(node) = stack.pop() {
            for &dep in self.dependents(node) {
                if dep != index && seen.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        let mut out: Vec<EntryIndex> = seen.into_iter().collect();
        out.sort_unstable();
        out
    }

    /// First cycle found by depth-first three-coloring, as a seq path that
    /// starts and ends on the same entry.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors = vec![Color::White; self.len()];
        for root in 0..self.len() {
            if colors[root] != Color::White {
                continue;
            }
            // (node, next dependency to visit); gray nodes are exactly the frames
            let mut frames: Vec<(EntryIndex, usize)> = vec![(root, 0)];
            colors[root] = Color::Gray;

            while let Some(frame) = frames.last_mut() {
                let (node, next) = *frame;
                let Some(&dep) = self.dependencies(node).get(next) else {
                    colors[node] = Color::Black;
                    frames.pop();
                    continue;
                };
                frame.1 += 1;
                match colors[dep] {
                    Color::Gray => {
                        let start = frames.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                        let mut path: Vec<String> = frames[start..]
                            .iter()
                            .map(|&(n, _)| self.seqs[n].clone())
                            .collect();
                        path.push(self.seqs[dep].clone());
                        return Some(path);
                    }
                    Color::White => {
                        colors[dep] = Color::Gray;
                        frames.push((dep, 0));
                    }
                    Color::Black => {}
                }
            }
        }
        None
    }
}

/// Builder for entry graphs.
pub struct DagBuilder<'a> {
    entries: &'a [ExecutionTableEntry],
}

impl<'a> DagBuilder<'a> {
    pub fn new(entries: &'a [ExecutionTableEntry]) -> Self {
        Self { entries }
    }

    /// Build the graph, failing on the first structural problem.
    ///
    /// Rejects duplicate seqs, self-dependencies, unknown dependencies and
    /// cycles.
    pub fn build(self) -> Result<EntryGraph, DagError> {
        let (graph, mut issues) = self.build_lenient();
        if !issues.is_empty() {
            return Err(issues.remove(0));
        }
        if let Some(path) = graph.find_cycle() {
            return Err(DagError::Cycle { path });
        }
        Ok(graph)
    }

    /// Every structural problem, including a cycle if one exists.
    pub fn audit(self) -> Vec<DagError> {
        let (graph, mut issues) = self.build_lenient();
        if let Some(path) = graph.find_cycle() {
            issues.push(DagError::Cycle { path });
        }
        issues
    }

    /// Build with invalid edges dropped, returning what was dropped.
    fn build_lenient(self) -> (EntryGraph, Vec<DagError>) {
        let mut issues = Vec::new();
        let mut index_map = HashMap::new();
        for (i, entry) in self.entries.iter().enumerate() {
            let key = entry.normalized_seq();
            if index_map.contains_key(&key) {
                issues.push(DagError::DuplicateSeq {
                    seq: entry.seq.clone(),
                });
                continue;
            }
            index_map.insert(key, i);
        }

        let n = self.entries.len();
        let mut forward_edges: Vec<Vec<EntryIndex>> = vec![Vec::new(); n];
        let mut reverse_edges: Vec<Vec<EntryIndex>> = vec![Vec::new(); n];

        for (to_idx, entry) in self.entries.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &entry.dependencies {
                let key = normalize_seq(dep);
                if key == entry.normalized_seq() {
                    issues.push(DagError::SelfDependency {
                        seq: entry.seq.clone(),
                    });
                    continue;
                }
                let Some(&from_idx) = index_map.get(&key) else {
                    issues.push(DagError::UnknownDependency {
                        seq: entry.seq.clone(),
                        dependency: dep.clone(),
                    });
                    continue;
                };
                if seen.insert(from_idx) {
                    forward_edges[from_idx].push(to_idx);
                    reverse_edges[to_idx].push(from_idx);
                }
            }
        }

        let graph = EntryGraph {
            seqs: self.entries.iter().map(|e| e.seq.clone()).collect(),
            index_map,
            forward_edges,
            reverse_edges,
        };
        (graph, issues)
    }
}
