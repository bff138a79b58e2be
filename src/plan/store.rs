//! Durable execution-table storage.
//!
//! The plan document is the single source of truth. Every read goes back to
//! disk; nothing is cached between calls, so edits made by an operator (or a
//! concurrent wave member) are always observed before the next decision.

use crate::plan::mirror::ExecutionMirror;
use crate::plan::parser::{parse_plan, replace_execution_table};
use crate::plan::types::{ExecutionTableEntry, PlanDocument, find_entry_mut};
use crate::util::write_atomic;
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};

pub struct PlanStore {
    plan_path: PathBuf,
    mirror_path: Option<PathBuf>,
}

impl PlanStore {
    pub fn new(plan_path: impl Into<PathBuf>) -> Self {
        Self {
            plan_path: plan_path.into(),
            mirror_path: None,
        }
    }

    /// Also regenerate a JSON mirror after every write.
    pub fn with_mirror(mut self, mirror_path: impl Into<PathBuf>) -> Self {
        self.mirror_path = Some(mirror_path.into());
        self
    }

    pub fn plan_path(&self) -> &Path {
        &self.plan_path
    }

    pub fn read_text(&self) -> Result<String> {
        fs::read_to_string(&self.plan_path)
            .with_context(|| format!("Failed to read plan {}", self.plan_path.display()))
    }

    /// Fresh parse of the plan document.
    pub fn load(&self) -> Result<PlanDocument> {
        Ok(parse_plan(&self.read_text()?))
    }

    pub fn load_entries(&self) -> Result<Vec<ExecutionTableEntry>> {
        Ok(self.load()?.entries)
    }

    /// Rewrite the execution table in place and refresh the mirror.
    pub fn save_entries(&self, entries: &[ExecutionTableEntry]) -> Result<()> {
        let text = self.read_text()?;
        let updated = replace_execution_table(&text, entries);
        write_atomic(&self.plan_path, updated.as_bytes())
            .with_context(|| format!("Failed to write plan {}", self.plan_path.display()))?;

        if let Some(mirror_path) = &self.mirror_path {
            let doc = parse_plan(&updated);
            ExecutionMirror::build(&doc.entries, &doc.contracts).write(mirror_path)?;
        }
        Ok(())
    }

    /// Load, modify one entry (matched by normalized seq), save.
    pub fn update_entry<F>(&self, seq: &str, update: F) -> Result<ExecutionTableEntry>
    where
        F: FnOnce(&mut ExecutionTableEntry),
    {
        let mut entries = self.load_entries()?;
        let Some(entry) = find_entry_mut(&mut entries, seq) else {
            bail!(
                "Entry {} not found in {}",
                seq,
                self.plan_path.display()
            );
        };
        update(entry);
        let updated = entry.clone();
        self.save_entries(&entries)?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::types::EntryStatus;
    use tempfile::tempdir;

    const PLAN: &str = "# Plan: Demo

## Execution Table
| Seq | Child | Status | Depends On | Started | Completed |
|-----|-------|--------|------------|---------|-----------|
| 01 | 01-a.md | pending | — | | |
| 02 | 02-b.md | pending | 01 | | |

## Dependency Contract Matrix
| Child | Requires | Provides |
|-------|----------|----------|
| 01-a | — | export:Alpha |
";

    #[test]
    fn test_update_entry_persists_and_mirrors() {
        let dir = tempdir().unwrap();
        let plan = dir.path().join("plan.md");
        let mirror = dir.path().join(".cascade").join("execution.json");
        fs::write(&plan, PLAN).unwrap();

        let store = PlanStore::new(&plan).with_mirror(&mirror);
        let updated = store
            .update_entry("1", |e| e.mark_started("2026-01-01T00:00:00Z"))
            .unwrap();
        assert_eq!(updated.status, EntryStatus::InProgress);

        let entries = store.load_entries().unwrap();
        assert_eq!(entries[0].status, EntryStatus::InProgress);
        assert_eq!(entries[0].started.as_deref(), Some("2026-01-01T00:00:00Z"));

        let m = ExecutionMirror::load(&mirror).unwrap();
        assert_eq!(m.children[0].status, EntryStatus::InProgress);
        assert_eq!(m.children[0].provides, vec!["export:Alpha"]);
    }

    #[test]
    fn test_load_observes_external_edits() {
        let dir = tempdir().unwrap();
        let plan = dir.path().join("plan.md");
        fs::write(&plan, PLAN).unwrap();
        let store = PlanStore::new(&plan);

        assert_eq!(store.load_entries().unwrap()[1].status, EntryStatus::Pending);
        fs::write(&plan, PLAN.replace("| 02 | 02-b.md | pending", "| 02 | 02-b.md | skipped")).unwrap();
        assert_eq!(store.load_entries().unwrap()[1].status, EntryStatus::Skipped);
    }

    #[test]
    fn test_update_unknown_entry_errors() {
        let dir = tempdir().unwrap();
        let plan = dir.path().join("plan.md");
        fs::write(&plan, PLAN).unwrap();
        let store = PlanStore::new(&plan);
        assert!(store.update_entry("10", |e| e.reset()).is_err());
    }
}
