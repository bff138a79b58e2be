//! Progress events and the end-of-run summary.

use crate::plan::types::{EntryStatus, ExecutionTableEntry};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Events emitted while a plan executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Started {
        plan: String,
        feature_branch: String,
        entries: usize,
    },
    EntryStarted {
        seq: String,
        branch: String,
    },
    PrerequisitesMissing {
        seq: String,
        missing: Vec<String>,
    },
    Resolution {
        seq: String,
        outcome: String,
    },
    EntryFinished {
        seq: String,
        status: String,
    },
    Merged {
        seq: String,
        branch: String,
    },
    MergeConflict {
        seq: String,
        branch: String,
        files: Vec<String>,
    },
    WaveStarted {
        wave: usize,
        seqs: Vec<String>,
    },
    WaveCompleted {
        wave: usize,
        succeeded: usize,
        failed: usize,
    },
    Paused {
        reason: String,
    },
    Finished {
        summary: RunSummary,
    },
}

/// Optional event sink shared by the runners.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<RunEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<RunEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub async fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.tx {
            tx.send(event).await.ok();
        }
    }
}

/// What a run accomplished, counted from the final table state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub partial: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    pub feature_branch: String,
    pub merged_branches: Vec<String>,
    pub iterations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

impl RunSummary {
    pub fn new(feature_branch: &str) -> Self {
        Self {
            feature_branch: feature_branch.to_string(),
            ..Default::default()
        }
    }

    /// Recount statuses from the table.
    pub fn tally(&mut self, entries: &[ExecutionTableEntry]) {
        self.total = entries.len();
        self.completed = count(entries, |s| *s == EntryStatus::Completed);
        self.partial = count(entries, |s| *s == EntryStatus::Partial);
        self.failed = count(entries, |s| *s == EntryStatus::Failed);
        self.skipped = count(entries, |s| *s == EntryStatus::Skipped);
        self.pending = count(entries, |s| {
            matches!(s, EntryStatus::Pending | EntryStatus::InProgress)
        });
    }

    pub fn all_completed(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }

    pub fn is_paused(&self) -> bool {
        self.paused_reason.is_some()
    }
}

fn count(entries: &[ExecutionTableEntry], pred: impl Fn(&EntryStatus) -> bool) -> usize {
    entries.iter().filter(|e| pred(&e.status)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally() {
        let entries = vec![
            ExecutionTableEntry::new("1", "a.md", vec![]).with_status(EntryStatus::Completed),
            ExecutionTableEntry::new("2", "b.md", vec![]).with_status(EntryStatus::Partial),
            ExecutionTableEntry::new("3", "c.md", vec![]),
        ];
        let mut summary = RunSummary::new("feat/x");
        summary.tally(&entries);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.partial, 1);
        assert_eq!(summary.pending, 1);
        assert!(!summary.all_completed());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_string(&RunEvent::Merged {
            seq: "01".into(),
            branch: "feat/x--01-a".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"merged\""));
    }

    #[tokio::test]
    async fn test_sink_without_channel_is_noop() {
        EventSink::default()
            .emit(RunEvent::Paused { reason: "x".into() })
            .await;

        let (tx, mut rx) = mpsc::channel(4);
        EventSink::new(tx)
            .emit(RunEvent::Paused { reason: "y".into() })
            .await;
        assert_eq!(rx.recv().await, Some(RunEvent::Paused { reason: "y".into() }));
    }
}
