//! Depth-based wave grouping for parallel execution.
//!
//! An entry's depth is 0 without dependencies, else one more than its deepest
//! dependency. Entries of equal depth form a wave and never depend on each
//! other.

use crate::dag::builder::{DagBuilder, EntryGraph, EntryIndex};
use crate::errors::DagError;
use crate::plan::types::ExecutionTableEntry;

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

fn cycle_error(graph: &EntryGraph, frames: &[(EntryIndex, usize)], node: EntryIndex) -> DagError {
    let start = frames.iter().position(|&(n, _)| n == node).unwrap_or(0);
    let mut path: Vec<String> = frames[start..]
        .iter()
        .filter_map(|&(n, _)| graph.seq(n).map(str::to_string))
        .collect();
    path.extend(graph.seq(node).map(str::to_string));
    DagError::Cycle { path }
}

/// Depth of every entry, by table index.
///
/// Walks with an explicit stack so long dependency chains cannot exhaust
/// the call stack.
pub fn compute_depths(entries: &[ExecutionTableEntry]) -> Result<Vec<usize>, DagError> {
    let graph = DagBuilder::new(entries).build()?;
    let mut marks = vec![Mark::Unvisited; graph.len()];
    let mut depths = vec![0; graph.len()];

    for root in 0..graph.len() {
        if marks[root] == Mark::Done {
            continue;
        }
        let mut frames: Vec<(EntryIndex, usize)> = vec![(root, 0)];
        marks[root] = Mark::Visiting;

        while let Some(frame) = frames.last_mut() {
            let (node, next) = *frame;
            let deps = graph.dependencies(node);
            let Some(&dep) = deps.get(next) else {
                depths[node] = deps.iter().map(|&d| depths[d] + 1).max().unwrap_or(0);
                marks[node] = Mark::Done;
                frames.pop();
                continue;
            };
            frame.1 += 1;
            match marks[dep] {
                Mark::Done => {}
                Mark::Visiting => return Err(cycle_error(&graph, &frames, dep)),
                Mark::Unvisited => {
                    marks[dep] = Mark::Visiting;
                    frames.push((dep, 0));
                }
            }
        }
    }
    Ok(depths)
}

/// Entries grouped by depth; members keep table order.
pub fn group_waves(
    entries: &[ExecutionTableEntry],
) -> Result<Vec<Vec<ExecutionTableEntry>>, DagError> {
    let depths = compute_depths(entries)?;
    let wave_count = depths.iter().copied().max().map_or(0, |d| d + 1);
    let mut waves: Vec<Vec<ExecutionTableEntry>> = vec![Vec::new(); wave_count];
    for (entry, depth) in entries.iter().zip(depths) {
        waves[depth].push(entry.clone());
    }
    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: &str, deps: Vec<&str>) -> ExecutionTableEntry {
        ExecutionTableEntry::new(
            seq,
            &format!("{}.md", seq),
            deps.into_iter().map(String::from).collect(),
        )
    }

    fn seqs(waves: &[Vec<ExecutionTableEntry>]) -> Vec<Vec<String>> {
        waves
            .iter()
            .map(|w| w.iter().map(|e| e.seq.clone()).collect())
            .collect()
    }

    #[test]
    fn test_two_roots_then_join() {
        let entries = vec![entry("A", vec![]), entry("B", vec![]), entry("C", vec!["A", "B"])];
        let waves = group_waves(&entries).unwrap();
        assert_eq!(seqs(&waves), vec![vec!["A", "B"], vec!["C"]]);
    }

    #[test]
    fn test_depth_uses_longest_path() {
        let entries = vec![
            entry("1", vec![]),
            entry("2", vec!["1"]),
            entry("3", vec!["1", "2"]),
            entry("4", vec![]),
        ];
        assert_eq!(compute_depths(&entries).unwrap(), vec![0, 1, 2, 0]);
        let waves = group_waves(&entries).unwrap();
        assert_eq!(seqs(&waves), vec![vec!["1", "4"], vec!["2"], vec!["3"]]);
    }

    #[test]
    fn test_wave_members_keep_table_order() {
        let entries = vec![
            entry("3", vec![]),
            entry("1", vec![]),
            entry("2", vec![]),
        ];
        let waves = group_waves(&entries).unwrap();
        assert_eq!(seqs(&waves), vec![vec!["3", "1", "2"]]);
    }

    #[test]
    fn test_cycle_aborts_with_path() {
        let entries = vec![entry("1", vec!["2"]), entry("2", vec!["1"])];
        let err = group_waves(&entries).unwrap_err();
        assert!(err.to_string().starts_with("Cycle detected:"));
    }

    #[test]
    fn test_deep_chain_depths() {
        let entries: Vec<ExecutionTableEntry> = (0..100_000)
            .map(|i: usize| {
                let deps = if i == 0 { vec![] } else { vec![(i - 1).to_string()] };
                ExecutionTableEntry::new(&i.to_string(), &format!("{}.md", i), deps)
            })
            .collect();
        let depths = compute_depths(&entries).unwrap();
        assert_eq!(depths.last(), Some(&99_999));
        assert_eq!(group_waves(&entries).unwrap().len(), 100_000);
    }

    #[test]
    fn test_empty_table() {
        assert!(group_waves(&[]).unwrap().is_empty());
    }
}
