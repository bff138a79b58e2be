//! Machine-readable JSON mirror of the execution table.
//!
//! The markdown table stays the source of truth; the mirror is regenerated
//! after every table write for tooling that does not want to parse markdown.

use crate::plan::types::{ContractMatrix, EntryStatus, ExecutionTableEntry};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorChild {
    pub seq: String,
    pub plan: String,
    pub status: EntryStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// Provided artifacts in `type:name` form.
    #[serde(default)]
    pub provides: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMirror {
    pub updated_at: DateTime<Utc>,
    pub children: Vec<MirrorChild>,
}

impl ExecutionMirror {
    pub fn build(entries: &[ExecutionTableEntry], contracts: &ContractMatrix) -> Self {
        let children = entries
            .iter()
            .map(|entry| MirrorChild {
                seq: entry.seq.clone(),
                plan: entry.path.clone(),
                status: entry.status.clone(),
                depends_on: entry.dependencies.clone(),
                started_at: entry.started.clone(),
                completed_at: entry.completed.clone(),
                provides: contracts
                    .for_entry(entry)
                    .map(|c| c.provides.iter().map(|a| a.to_string()).collect())
                    .unwrap_or_default(),
            })
            .collect();

        Self {
            updated_at: Utc::now(),
            children,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        crate::util::write_json_atomic(path, self)
            .with_context(|| format!("Failed to write execution mirror {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse execution mirror")
    }
}
