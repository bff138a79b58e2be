//! Persistent per-entry failure counters.
//!
//! Stored as `<config_dir>/resolution.json` so retry limits hold across
//! restarts of the orchestrator.

use crate::plan::types::normalize_seq;
use crate::util::{now_timestamp, write_json_atomic};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Seq as written in the table
    pub seq: String,
    pub prerequisite_failures: u32,
    pub backtracks: u32,
    /// Artifacts missing at the most recent failure
    #[serde(default)]
    pub last_missing: Vec<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureLedger {
    /// Keyed by normalized seq
    #[serde(default)]
    pub records: BTreeMap<String, FailureRecord>,
}

impl FailureLedger {
    /// Load the ledger, or an empty one when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    pub fn get(&self, seq: &str) -> Option<&FailureRecord> {
        self.records.get(&normalize_seq(seq))
    }

    fn record_mut(&mut self, seq: &str) -> &mut FailureRecord {
        let record = self
            .records
            .entry(normalize_seq(seq))
            .or_insert_with(|| FailureRecord {
                seq: seq.to_string(),
                ..Default::default()
            });
        record.updated_at = Some(now_timestamp());
        record
    }

    /// Count one more prerequisite failure and return the updated record.
    pub fn record_failure(&mut self, seq: &str, missing: Vec<String>) -> FailureRecord {
        let record = self.record_mut(seq);
        record.prerequisite_failures += 1;
        record.last_missing = missing;
        record.clone()
    }

    pub fn record_backtrack(&mut self, seq: &str) {
        self.record_mut(seq).backtracks += 1;
    }

    /// Forget an entry once it completes.
    pub fn clear(&mut self, seq: &str) -> bool {
        self.records.remove(&normalize_seq(seq)).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_counts_survive_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("resolution.json");

        let mut ledger = FailureLedger::load(&path).unwrap();
        ledger.record_failure("02", vec!["export:UserModel".into()]);
        ledger.record_backtrack("2");
        ledger.save(&path).unwrap();

        let mut reloaded = FailureLedger::load(&path).unwrap();
        let record = reloaded.record_failure("2", vec![]);
        assert_eq!(record.prerequisite_failures, 2);
        assert_eq!(record.backtracks, 1);
        assert_eq!(record.seq, "02");
    }

    #[test]
    fn test_clear() {
        let mut ledger = FailureLedger::default();
        ledger.record_failure("3", vec![]);
        assert!(ledger.clear("03"));
        assert!(ledger.get("3").is_none());
        assert!(!ledger.clear("3"));
    }
}
