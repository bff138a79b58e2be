//! Applies resolution decisions to the plan and child documents.

use crate::dag::DagBuilder;
use crate::plan::parser::append_acceptance_tasks;
use crate::plan::types::{
    Artifact, ContractMatrix, EntryStatus, ExecutionTableEntry, find_entry_mut,
};
use crate::plan::{PlanStore, seq_eq};
use crate::resolution::ledger::FailureLedger;
use crate::resolution::strategy::{Decision, ResolutionLimits, ResolutionStrategy, decide};
use crate::util::{now_timestamp, write_atomic};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Result of resolving one prerequisite failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Orchestration must stop until the operator intervenes.
    Paused { reason: String },
    /// Providers got repair tasks and were reset to `pending`.
    Requeued {
        backtrack: bool,
        providers: Vec<String>,
        tasks_added: usize,
    },
    /// The entry (and possibly its dependents) was marked `skipped`.
    Skipped { seqs: Vec<String> },
}

impl fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionOutcome::Paused { reason } => write!(f, "paused: {}", reason),
            ResolutionOutcome::Requeued {
                backtrack,
                providers,
                tasks_added,
            } => write!(
                f,
                "{} {} ({} task(s) added)",
                if *backtrack { "backtracked to" } else { "requeued" },
                providers.join(", "),
                tasks_added
            ),
            ResolutionOutcome::Skipped { seqs } => write!(f, "skipped {}", seqs.join(", ")),
        }
    }
}

pub struct ResolutionEngine {
    strategy: ResolutionStrategy,
    limits: ResolutionLimits,
    cascade_skip: bool,
    children_dir: PathBuf,
    ledger_path: PathBuf,
}

impl ResolutionEngine {
    pub fn new(
        strategy: ResolutionStrategy,
        limits: ResolutionLimits,
        children_dir: impl Into<PathBuf>,
        ledger_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            strategy,
            limits,
            cascade_skip: false,
            children_dir: children_dir.into(),
            ledger_path: ledger_path.into(),
        }
    }

    pub fn with_cascade_skip(mut self, cascade_skip: bool) -> Self {
        self.cascade_skip = cascade_skip;
        self
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Count the failure, decide, and apply the decision.
    pub fn resolve(
        &self,
        store: &PlanStore,
        matrix: &ContractMatrix,
        entry: &ExecutionTableEntry,
        missing: &[Artifact],
    ) -> Result<ResolutionOutcome> {
        let mut ledger = FailureLedger::load(&self.ledger_path)?;
        let record = ledger.record_failure(
            &entry.seq,
            missing.iter().map(|a| a.to_string()).collect(),
        );
        let decision = decide(&record, self.strategy, &self.limits);
        tracing::info!(
            seq = %entry.seq,
            failures = record.prerequisite_failures,
            strategy = %self.strategy,
            ?decision,
            "Resolving prerequisite failure"
        );

        let outcome = match decision {
            Decision::Pause { reason } => ResolutionOutcome::Paused { reason },
            Decision::Skip => self.skip(store, entry)?,
            Decision::SelfHeal => self.requeue_providers(store, matrix, entry, missing, false)?,
            Decision::Backtrack => {
                let outcome = self.requeue_providers(store, matrix, entry, missing, true)?;
                if matches!(outcome, ResolutionOutcome::Requeued { .. }) {
                    ledger.record_backtrack(&entry.seq);
                }
                outcome
            }
        };

        ledger.save(&self.ledger_path)?;
        Ok(outcome)
    }

    /// Forget an entry's failure history once it completes.
    pub fn clear(&self, seq: &str) -> Result<()> {
        let mut ledger = FailureLedger::load(&self.ledger_path)?;
        if ledger.clear(seq) {
            ledger.save(&self.ledger_path)?;
        }
        Ok(())
    }

    fn skip(&self, store: &PlanStore, entry: &ExecutionTableEntry) -> Result<ResolutionOutcome> {
        let mut entries = store.load_entries()?;
        let mut targets = vec![entry.seq.clone()];

        if self.cascade_skip {
            let graph = DagBuilder::new(&entries).build()?;
            if let Some(index) = graph.get_index(&entry.seq) {
                targets.extend(
                    graph
                        .transitive_dependents(index)
                        .into_iter()
                        .filter(|&i| entries[i].status == EntryStatus::Pending)
                        .map(|i| entries[i].seq.clone()),
                );
            }
        }

        let now = now_timestamp();
        let mut skipped = Vec::new();
        for seq in targets {
            if let Some(target) = find_entry_mut(&mut entries, &seq)
                && target.status.can_transition_to(&EntryStatus::Skipped)
            {
                target.mark_finished(EntryStatus::Skipped, &now);
                skipped.push(seq);
            }
        }
        store.save_entries(&entries)?;
        tracing::warn!(seqs = ?skipped, "Skipped entries");
        Ok(ResolutionOutcome::Skipped { seqs: skipped })
    }

    fn requeue_providers(
        &self,
        store: &PlanStore,
        matrix: &ContractMatrix,
        entry: &ExecutionTableEntry,
        missing: &[Artifact],
        backtrack: bool,
    ) -> Result<ResolutionOutcome> {
        let mut entries = store.load_entries()?;

        // provider seq -> tasks
        let mut tasks: BTreeMap<String, (String, Vec<String>)> = BTreeMap::new();
        for artifact in missing {
            let providers: Vec<&ExecutionTableEntry> = matrix
                .providers_of(artifact)
                .into_iter()
                .filter_map(|c| entries.iter().find(|e| c.matches_entry(e)))
                .filter(|e| !seq_eq(&e.seq, &entry.seq))
                .collect();
            if providers.is_empty() {
                return Ok(ResolutionOutcome::Paused {
                    reason: format!(
                        "no entry provides {} (required by {})",
                        artifact, entry.seq
                    ),
                });
            }
            for provider in providers {
                let task = if backtrack {
                    format!(
                        "Remediation (backtrack from {}): provide {}",
                        entry.seq, artifact
                    )
                } else {
                    format!("Repair: provide {} (required by {})", artifact, entry.seq)
                };
                tasks
                    .entry(provider.normalized_seq())
                    .or_insert_with(|| (provider.path.clone(), Vec::new()))
                    .1
                    .push(task);
            }
        }

        let mut tasks_added = 0;
        let mut providers = Vec::new();
        let mut stuck = Vec::new();
        for (seq, (reference, provider_tasks)) in &tasks {
            let Some(provider) = find_entry_mut(&mut entries, seq) else {
                continue;
            };
            if provider.status != EntryStatus::Pending {
                if !provider.status.can_transition_to(&EntryStatus::Pending) {
                    tracing::warn!(
                        seq = %provider.seq,
                        status = %provider.status,
                        "Provider cannot be requeued"
                    );
                    stuck.push(format!("{} ({})", provider.seq, provider.status));
                    continue;
                }
                provider.reset();
            }
            providers.push(provider.seq.clone());
            tasks_added += self.append_tasks(reference, provider_tasks)?;
        }

        if providers.is_empty() {
            return Ok(ResolutionOutcome::Paused {
                reason: format!(
                    "no provider of {} can be requeued: {}",
                    entry.seq,
                    stuck.join(", ")
                ),
            });
        }
        store.save_entries(&entries)?;

        tracing::info!(
            seq = %entry.seq,
            providers = ?providers,
            tasks_added,
            backtrack,
            "Requeued providers"
        );
        Ok(ResolutionOutcome::Requeued {
            backtrack,
            providers,
            tasks_added,
        })
    }

    fn append_tasks(&self, reference: &str, tasks: &[String]) -> Result<usize> {
        let path = self.child_path(reference);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read child plan {}", path.display()))?;
        let (updated, added) = append_acceptance_tasks(&text, tasks);
        if added > 0 {
            write_atomic(&path, updated.as_bytes())?;
        }
        Ok(added)
    }

    fn child_path(&self, reference: &str) -> PathBuf {
        Path::new(&self.children_dir).join(reference)
    }
}
