use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Durable record of the orchestration run that owns a config directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub active: bool,
    pub status: SessionStatus,
    pub parent_plan: PathBuf,
    pub children_dir: PathBuf,
    /// Seq of the entry being executed, if any
    #[serde(default)]
    pub current_child: Option<String>,
    #[serde(default)]
    pub feature_branch: Option<String>,
    pub execution_table_path: PathBuf,
    pub owner_pid: u32,
    pub config_dir: PathBuf,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Why the run stopped early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Merge left conflicted for the operator to finish
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_merge: Option<PendingMerge>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMerge {
    pub seq: String,
    pub branch: String,
}

impl SessionState {
    pub fn new(parent_plan: PathBuf, children_dir: PathBuf, config_dir: PathBuf) -> Self {
        Self {
            active: true,
            status: SessionStatus::Running,
            execution_table_path: parent_plan.clone(),
            parent_plan,
            children_dir,
            current_child: None,
            feature_branch: None,
            owner_pid: std::process::id(),
            config_dir,
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            updated_at: None,
            reason: None,
            pending_merge: None,
        }
    }

    pub fn is_owned_by_current_process(&self) -> bool {
        self.owner_pid == std::process::id()
    }

    /// Set when an operator asked the owning process to stop.
    pub fn is_cancelled(&self) -> bool {
        self.status == SessionStatus::Cancelled
    }
}
