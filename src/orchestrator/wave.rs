//! Wave-parallel execution over isolated worktrees.
//!
//! Each pass re-reads the table and takes the shallowest wave that still has
//! runnable members. Members run concurrently, each in its own worktree and
//! branch, bounded by a semaphore. Merges back into the feature branch happen
//! one at a time in table order.

use crate::dag::{Selection, find_next_executable, group_waves, ready_entries};
use crate::errors::CascadeError;
use crate::git::{checkpoint_tag_name, child_branch_name, slugify};
use crate::orchestrator::events::{RunEvent, RunSummary};
use crate::orchestrator::executor::{ExecutionOutcome, ExecutionRequest};
use crate::orchestrator::runner::{Orchestrator, Step, commit_message, execute};
use crate::plan::types::{EntryStatus, ExecutionTableEntry, PlanDocument, find_entry};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

struct WaveTask {
    entry: ExecutionTableEntry,
    branch: String,
    worktree: PathBuf,
}

pub struct WaveBroker<'a> {
    orchestrator: &'a Orchestrator,
    max_parallel: usize,
}

impl<'a> WaveBroker<'a> {
    pub fn new(orchestrator: &'a Orchestrator, max_parallel: usize) -> Self {
        Self {
            orchestrator,
            max_parallel: max_parallel.max(1),
        }
    }

    pub async fn run(&self, feature: &str, summary: &mut RunSummary) -> Result<(), CascadeError> {
        loop {
            let Some(doc) = self.orchestrator.next_iteration(summary)? else {
                break;
            };
            match find_next_executable(&doc.entries) {
                Selection::Exhausted => break,
                Selection::Blocked(reason) => {
                    summary.paused_reason = Some(reason.to_string());
                    break;
                }
                Selection::Ready(_) => {}
            }

            let ready = ready_entries(&doc.entries);
            let Some((depth, members)) = group_waves(&doc.entries)?
                .into_iter()
                .enumerate()
                .find_map(|(depth, wave)| {
                    let members: Vec<ExecutionTableEntry> = wave
                        .into_iter()
                        .filter(|e| find_entry(&ready, &e.seq).is_some())
                        .collect();
                    (!members.is_empty()).then_some((depth, members))
                })
            else {
                break;
            };

            if let Step::Pause(reason) = self
                .run_wave(depth + 1, &doc, members, feature, summary)
                .await?
            {
                summary.paused_reason = Some(reason);
                break;
            }
        }
        Ok(())
    }

    async fn run_wave(
        &self,
        wave: usize,
        doc: &PlanDocument,
        members: Vec<ExecutionTableEntry>,
        feature: &str,
        summary: &mut RunSummary,
    ) -> Result<Step, CascadeError> {
        let orch = self.orchestrator;
        tracing::info!(wave, members = members.len(), "Wave starting");
        orch.events
            .emit(RunEvent::WaveStarted {
                wave,
                seqs: members.iter().map(|e| e.seq.clone()).collect(),
            })
            .await;

        let mut runnable = Vec::new();
        let mut resolved_any = false;
        for entry in members {
            let pre = orch.verifier.verify_prerequisites(&entry, &doc.contracts);
            if pre.is_satisfied() {
                runnable.push(entry);
                continue;
            }
            match orch.handle_missing_prerequisites(doc, &entry, &pre).await? {
                Step::Pause(reason) => return Ok(Step::Pause(reason)),
                Step::Continue => resolved_any = true,
            }
        }
        // Resolution rewrote the table; plan the wave again from fresh state.
        if resolved_any || runnable.is_empty() {
            return Ok(Step::Continue);
        }

        let mut tasks = Vec::new();
        for entry in runnable {
            let branch = child_branch_name(feature, &entry.seq, &entry.child_id())?;
            let worktree = orch.config.worktree_dir().join(slugify(&branch, 120));
            if worktree.exists()
                && let Err(e) = orch.branches.remove_worktree(&worktree).await
            {
                tracing::warn!(path = %worktree.display(), error = %e, "Failed to remove stale worktree");
            }
            orch.branches.add_worktree(&worktree, &branch, feature).await?;
            orch.start_entry(&entry, &branch).await?;
            tasks.push(WaveTask {
                entry,
                branch,
                worktree,
            });
        }

        let outcomes = self.execute_all(&tasks).await;

        let mut mergeable = Vec::new();
        let mut failed = 0;
        for (task, outcome) in tasks.iter().zip(outcomes) {
            orch.branches
                .commit_all(&task.worktree, &commit_message(&task.entry))
                .await?;
            if !outcome.success {
                tracing::warn!(seq = %task.entry.seq, exit_code = ?outcome.exit_code, "Executor failed");
                orch.finish_entry(&task.entry, EntryStatus::Failed).await?;
                failed += 1;
                continue;
            }
            let post = orch
                .verifier
                .at(&task.worktree)
                .verify_provides(&task.entry, &doc.contracts);
            if !post.is_satisfied() {
                tracing::warn!(
                    seq = %task.entry.seq,
                    missing = %post.missing_summary(),
                    "Entry ran but did not provide everything it promised"
                );
                orch.finish_entry(&task.entry, EntryStatus::Partial).await?;
                failed += 1;
                continue;
            }
            mergeable.push(task);
        }

        for task in &tasks {
            if let Err(e) = orch.branches.remove_worktree(&task.worktree).await {
                tracing::warn!(path = %task.worktree.display(), error = %e, "Failed to remove worktree");
            }
        }

        if failed == tasks.len() {
            orch.events
                .emit(RunEvent::WaveCompleted {
                    wave,
                    succeeded: 0,
                    failed,
                })
                .await;
            return Err(CascadeError::WaveAborted { wave });
        }

        orch.branches
            .tag(&checkpoint_tag_name(feature, wave)?)
            .await?;

        let mut step = Step::Continue;
        for task in mergeable {
            step = orch
                .merge_child(&task.entry, &task.branch, feature, summary)
                .await?;
            if matches!(step, Step::Pause(_)) {
                break;
            }
        }

        let entries = orch.store.load_entries()?;
        let succeeded = tasks
            .iter()
            .filter(|t| {
                find_entry(&entries, &t.entry.seq)
                    .is_some_and(|e| e.status == EntryStatus::Completed)
            })
            .count();
        tracing::info!(wave, succeeded, failed, "Wave finished");
        orch.events
            .emit(RunEvent::WaveCompleted {
                wave,
                succeeded,
                failed: tasks.len() - succeeded,
            })
            .await;
        Ok(step)
    }

    /// Run every task's executor, at most `max_parallel` at a time.
    async fn execute_all(&self, tasks: &[WaveTask]) -> Vec<ExecutionOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let handles = tasks.iter().map(|task| {
            let semaphore = semaphore.clone();
            let executor = self.orchestrator.executor.clone();
            let request = ExecutionRequest {
                seq: task.entry.seq.clone(),
                child_path: self.orchestrator.children_dir.join(&task.entry.path),
                workdir: task.worktree.clone(),
                branch: task.branch.clone(),
            };
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ExecutionOutcome::failure("executor pool closed");
                };
                execute(executor.as_ref(), &request).await
            })
        });

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| {
                joined.unwrap_or_else(|e| ExecutionOutcome::failure(format!("executor task panicked: {}", e)))
            })
            .collect()
    }
}
