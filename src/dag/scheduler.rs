//! Next-entry selection over the execution table.
//!
//! Selection is a pure function of the table as it is on disk right now; the
//! orchestrator re-reads the table before every call.

use crate::plan::types::{EntryStatus, ExecutionTableEntry, find_entry};
use std::fmt;

/// Why nothing is runnable while pending entries remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// A pending entry waits on a predecessor that will not complete on its own.
    FailedPredecessor {
        seq: String,
        blocker: String,
        status: EntryStatus,
    },
    /// A pending entry names a seq that is not in the table.
    MissingDependency { seq: String, dependency: String },
    /// Pending entries only wait on entries that are still running.
    InFlight { seqs: Vec<String> },
    /// Pending entries only wait on each other.
    LikelyCycle { seqs: Vec<String> },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::FailedPredecessor {
                seq,
                blocker,
                status,
            } => write!(
                f,
                "entry {} is blocked by entry {} ({}); resolve it or reset it to pending",
                seq, blocker, status
            ),
            BlockReason::MissingDependency { seq, dependency } => write!(
                f,
                "entry {} depends on {}, which is not in the execution table",
                seq, dependency
            ),
            BlockReason::InFlight { seqs } => {
                write!(f, "waiting on in-progress entries: {}", seqs.join(", "))
            }
            BlockReason::LikelyCycle { seqs } => write!(
                f,
                "pending entries wait on each other (likely a cycle): {}",
                seqs.join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Ready(ExecutionTableEntry),
    /// No pending entries remain.
    Exhausted,
    Blocked(BlockReason),
}

fn dependencies_completed(entry: &ExecutionTableEntry, entries: &[ExecutionTableEntry]) -> bool {
    entry.dependencies.iter().all(|dep| {
        find_entry(entries, dep)
            .map(|d| d.status.unblocks_dependents())
            .unwrap_or(false)
    })
}

/// First pending entry, in table order, whose dependencies are all `completed`.
pub fn find_next_executable(entries: &[ExecutionTableEntry]) -> Selection {
    let pending: Vec<&ExecutionTableEntry> = entries
        .iter()
        .filter(|e| e.status == EntryStatus::Pending)
        .collect();
    if pending.is_empty() {
        return Selection::Exhausted;
    }

    if let Some(ready) = pending.iter().find(|e| dependencies_completed(e, entries)) {
        return Selection::Ready((*ready).clone());
    }

    for entry in &pending {
        for dep in &entry.dependencies {
            if find_entry(entries, dep).is_none() {
                return Selection::Blocked(BlockReason::MissingDependency {
                    seq: entry.seq.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    for entry in &pending {
        for dep in &entry.dependencies {
            if let Some(blocker) = find_entry(entries, dep)
                && blocker.status.is_blocking_failure()
            {
                return Selection::Blocked(BlockReason::FailedPredecessor {
                    seq: entry.seq.clone(),
                    blocker: blocker.seq.clone(),
                    status: blocker.status.clone(),
                });
            }
        }
    }

    let in_flight: Vec<String> = entries
        .iter()
        .filter(|e| e.status == EntryStatus::InProgress)
        .map(|e| e.seq.clone())
        .collect();
    if !in_flight.is_empty() {
        return Selection::Blocked(BlockReason::InFlight { seqs: in_flight });
    }

    Selection::Blocked(BlockReason::LikelyCycle {
        seqs: pending.iter().map(|e| e.seq.clone()).collect(),
    })
}

/// Every pending entry whose dependencies are all `completed`, in table order.
pub fn ready_entries(entries: &[ExecutionTableEntry]) -> Vec<ExecutionTableEntry> {
    entries
        .iter()
        .filter(|e| e.status == EntryStatus::Pending && dependencies_completed(e, entries))
        .cloned()
        .collect()
}

/// Iteration bound for the main loop.
pub fn safety_cap(entry_count: usize, safety_margin: usize) -> usize {
    entry_count + safety_margin
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: &str, deps: Vec<&str>, status: EntryStatus) -> ExecutionTableEntry {
        ExecutionTableEntry::new(
            seq,
            &format!("{}-child.md", seq),
            deps.into_iter().map(String::from).collect(),
        )
        .with_status(status)
    }

    fn ready_seq(selection: Selection) -> String {
        match selection {
            Selection::Ready(e) => e.seq,
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn test_basic_ordering() {
        let mut entries = vec![
            entry("01", vec![], EntryStatus::Pending),
            entry("02", vec!["01"], EntryStatus::Pending),
            entry("03", vec!["01"], EntryStatus::Pending),
        ];
        assert_eq!(ready_seq(find_next_executable(&entries)), "01");

        entries[0].status = EntryStatus::Completed;
        assert_eq!(ready_seq(find_next_executable(&entries)), "02");

        entries[1].status = EntryStatus::Completed;
        assert_eq!(ready_seq(find_next_executable(&entries)), "03");

        entries[2].status = EntryStatus::Completed;
        assert_eq!(find_next_executable(&entries), Selection::Exhausted);
    }

    #[test]
    fn test_partial_never_unblocks() {
        let entries = vec![
            entry("01", vec![], EntryStatus::Partial),
            entry("02", vec!["01"], EntryStatus::Pending),
        ];
        match find_next_executable(&entries) {
            Selection::Blocked(BlockReason::FailedPredecessor {
                seq,
                blocker,
                status,
            }) => {
                assert_eq!(seq, "02");
                assert_eq!(blocker, "01");
                assert_eq!(status, EntryStatus::Partial);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_all_dependencies_must_be_completed() {
        let entries = vec![
            entry("01", vec![], EntryStatus::Completed),
            entry("02", vec![], EntryStatus::InProgress),
            entry("03", vec!["01", "02"], EntryStatus::Pending),
        ];
        assert_eq!(
            find_next_executable(&entries),
            Selection::Blocked(BlockReason::InFlight {
                seqs: vec!["02".into()]
            })
        );
    }

    #[test]
    fn test_cycle_members_never_selected() {
        let entries = vec![
            entry("1", vec!["2"], EntryStatus::Pending),
            entry("2", vec!["1"], EntryStatus::Pending),
        ];
        assert!(matches!(
            find_next_executable(&entries),
            Selection::Blocked(BlockReason::LikelyCycle { .. })
        ));
    }

    #[test]
    fn test_seq_collision_safety() {
        let entries = vec![
            entry("1", vec![], EntryStatus::Pending),
            entry("10", vec![], EntryStatus::Completed),
            entry("11", vec!["01"], EntryStatus::Pending),
        ];
        // "11" waits on "1", not "10".
        assert_eq!(ready_seq(find_next_executable(&entries)), "1");
        let entries = vec![
            entry("1", vec![], EntryStatus::Failed),
            entry("10", vec![], EntryStatus::Completed),
            entry("11", vec!["01"], EntryStatus::Pending),
        ];
        assert!(matches!(
            find_next_executable(&entries),
            Selection::Blocked(BlockReason::FailedPredecessor { .. })
        ));
    }

    #[test]
    fn test_unknown_status_is_never_selected_and_blocks() {
        let entries = vec![
            entry("1", vec![], EntryStatus::Unknown("waiting-on-legal".into())),
            entry("2", vec!["1"], EntryStatus::Pending),
        ];
        assert!(matches!(
            find_next_executable(&entries),
            Selection::Blocked(BlockReason::FailedPredecessor { .. })
        ));
    }

    #[test]
    fn test_missing_dependency_reported() {
        let entries = vec![entry("1", vec!["7"], EntryStatus::Pending)];
        assert_eq!(
            find_next_executable(&entries),
            Selection::Blocked(BlockReason::MissingDependency {
                seq: "1".into(),
                dependency: "7".into()
            })
        );
    }

    #[test]
    fn test_safety_cap() {
        assert_eq!(safety_cap(3, 10), 13);
    }
}
