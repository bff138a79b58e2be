//! Sequential plan execution.
//!
//! The loop re-reads the execution table at the top of every iteration, picks
//! the first runnable entry, verifies its prerequisites, runs the executor on a
//! child branch, verifies what it promised and merges it back with `--no-ff`.

use crate::coherence::CoherenceChecker;
use crate::config::CascadeConfig;
use crate::contract::{ContractVerifier, VerificationReport};
use crate::dag::{DagBuilder, Selection, find_next_executable, safety_cap};
use crate::errors::{CascadeError, SessionError};
use crate::gates::{ConflictContext, OperatorPrompt, prompt_for};
use crate::git::{
    BranchManager, ConflictResolution, FinalizeOptions, MergeOutcome, child_branch_name,
    feature_branch_name,
};
use crate::orchestrator::events::{EventSink, RunEvent, RunSummary};
use crate::orchestrator::executor::{ChildExecutor, ExecutionOutcome, ExecutionRequest};
use crate::orchestrator::wave::WaveBroker;
use crate::plan::types::{EntryStatus, ExecutionTableEntry, PlanDocument, child_stem};
use crate::plan::PlanStore;
use crate::resolution::{ResolutionEngine, ResolutionLimits, ResolutionOutcome, ResolutionStrategy};
use crate::session::{PendingMerge, SessionManager, SessionState, SessionStatus, ensure_gitignore};
use crate::util::now_timestamp;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-run overrides layered over `cascade.toml`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory child references resolve against; defaults to the plan's directory
    pub children_dir: Option<PathBuf>,
    pub resume: bool,
    pub strategy: ResolutionStrategy,
    pub parallel: bool,
    pub max_parallel: usize,
    pub push: bool,
    pub cleanup: bool,
}

impl RunOptions {
    pub fn from_config(config: &CascadeConfig) -> Self {
        let toml = &config.toml;
        Self {
            children_dir: None,
            resume: false,
            strategy: toml.resolution.strategy,
            parallel: toml.parallel.enabled,
            max_parallel: toml.parallel.max_parallel,
            push: toml.branches.push,
            cleanup: toml.branches.cleanup,
        }
    }
}

/// Whether the loop keeps going after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Continue,
    Pause(String),
}

pub struct Orchestrator {
    pub(crate) config: CascadeConfig,
    pub(crate) options: RunOptions,
    pub(crate) trunk: String,
    pub(crate) children_dir: PathBuf,
    pub(crate) store: PlanStore,
    pub(crate) branches: BranchManager,
    pub(crate) verifier: ContractVerifier,
    pub(crate) executor: Arc<dyn ChildExecutor>,
    prompt: Box<dyn OperatorPrompt>,
    resolution: ResolutionEngine,
    sessions: SessionManager,
    pub(crate) events: EventSink,
}

impl Orchestrator {
    pub fn new(
        config: CascadeConfig,
        plan: &Path,
        options: RunOptions,
        executor: Arc<dyn ChildExecutor>,
    ) -> anyhow::Result<Self> {
        let plan = plan
            .canonicalize()
            .with_context(|| format!("Plan not found: {}", plan.display()))?;
        let children_dir = match &options.children_dir {
            Some(dir) => dir.clone(),
            None => plan
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };

        let store = PlanStore::new(&plan).with_mirror(config.mirror_file());
        let branches = BranchManager::new(&config.project_dir, &config.toml.project.remote);
        let verifier =
            ContractVerifier::new(&config.project_dir, config.toml.verification.clone());
        let resolution = ResolutionEngine::new(
            options.strategy,
            ResolutionLimits::from(&config.toml.resolution),
            &children_dir,
            config.resolution_file(),
        )
        .with_cascade_skip(config.toml.resolution.cascade_skip);
        let prompt = prompt_for(config.toml.branches.conflict_policy);
        let sessions = SessionManager::new(&config.config_dir);

        Ok(Self {
            trunk: config.trunk(),
            config,
            options,
            children_dir,
            store,
            branches,
            verifier,
            executor,
            prompt,
            resolution,
            sessions,
            events: EventSink::default(),
        })
    }

    pub fn with_prompt(mut self, prompt: Box<dyn OperatorPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> &PlanStore {
        &self.store
    }

    /// Execute the plan until it finishes, pauses or fails.
    pub async fn run(&self) -> Result<RunSummary, CascadeError> {
        let doc = self.store.load()?;
        for warning in &doc.warnings {
            tracing::warn!(plan = %self.store.plan_path().display(), "{}", warning);
        }
        if doc.entries.is_empty() {
            return Err(anyhow::anyhow!(
                "{} has no execution table rows",
                self.store.plan_path().display()
            )
            .into());
        }

        self.coherence_gate()?;
        DagBuilder::new(&doc.entries).build()?;

        let acquired = self
            .sessions
            .acquire(
                self.store.plan_path(),
                &self.children_dir,
                &self.store,
                self.options.resume,
            )
            .map_err(session_error)?;
        for seq in &acquired.recovered {
            tracing::warn!(seq = %seq, "Recovered entry left in_progress by a previous run");
        }

        let result = self.run_owned(&doc, acquired.state).await;
        let (status, reason) = match &result {
            Ok(summary) if summary.all_completed() => (SessionStatus::Completed, None),
            Ok(summary) if summary.is_paused() => {
                (SessionStatus::Paused, summary.paused_reason.clone())
            }
            Ok(summary) => (
                SessionStatus::Failed,
                Some(format!(
                    "{} of {} entries did not complete",
                    summary.total - summary.completed,
                    summary.total
                )),
            ),
            Err(e) => (SessionStatus::Failed, Some(e.to_string())),
        };
        if let Err(e) = self.sessions.release(status, reason) {
            tracing::warn!(error = %e, "Failed to release session");
        }
        result
    }

    /// Check the plan before anything touches the repository.
    fn coherence_gate(&self) -> Result<(), CascadeError> {
        let checker = CoherenceChecker::new(self.config.toml.coherence.clone());
        let (_, report) = checker.check_store(&self.store, &self.children_dir)?;
        ensure_gitignore(&self.config.config_dir)?;
        report.write(&self.config.report_json(), &self.config.report_markdown())?;

        for issue in report.all_issues().filter(|i| !i.is_error()) {
            tracing::warn!(category = %issue.category, "{}", issue.message);
        }
        if report.has_errors() && self.config.toml.coherence.block_on_errors {
            return Err(CascadeError::Validation {
                errors: report.error_count(),
                report: self.config.report_markdown(),
            });
        }
        Ok(())
    }

    async fn run_owned(
        &self,
        doc: &PlanDocument,
        session: SessionState,
    ) -> Result<RunSummary, CascadeError> {
        let feature = match &session.feature_branch {
            Some(feature) => feature.clone(),
            None => {
                let title = doc
                    .title
                    .clone()
                    .unwrap_or_else(|| child_stem(&self.store.plan_path().to_string_lossy()));
                feature_branch_name(&self.config.toml.branches.prefix, &title)?
            }
        };

        self.branches
            .ensure_feature_branch(&feature, &self.trunk)
            .await?;
        self.sessions.update(|s| s.feature_branch = Some(feature.clone()))?;

        let mut summary = RunSummary::new(&feature);
        if let Some(pending) = &session.pending_merge {
            self.reconcile_pending_merge(pending, &feature, &mut summary)
                .await?;
        }

        self.events
            .emit(RunEvent::Started {
                plan: self.store.plan_path().display().to_string(),
                feature_branch: feature.clone(),
                entries: doc.entries.len(),
            })
            .await;

        if self.options.parallel {
            WaveBroker::new(self, self.options.max_parallel)
                .run(&feature, &mut summary)
                .await?;
        } else {
            self.run_sequential(&feature, &mut summary).await?;
        }

        let entries = self.store.load_entries()?;
        summary.tally(&entries);

        if summary.all_completed() {
            let options = FinalizeOptions {
                push: self.options.push,
                create_pr: self.config.toml.branches.create_pr,
                title: doc.title.clone().unwrap_or_else(|| feature.clone()),
                body: pull_request_body(&self.store.plan_path().display().to_string(), &summary),
            };
            let outcome = self
                .branches
                .finalize(&feature, &self.trunk, &options)
                .await?;
            summary.pr_url = outcome.pr_url;
        }

        if self.options.cleanup && !summary.merged_branches.is_empty() {
            let deleted = self.branches.cleanup(&summary.merged_branches).await;
            tracing::info!(deleted, "Cleaned up merged child branches");
        }

        if let Some(reason) = &summary.paused_reason {
            self.events
                .emit(RunEvent::Paused {
                    reason: reason.clone(),
                })
                .await;
        }
        self.events
            .emit(RunEvent::Finished {
                summary: summary.clone(),
            })
            .await;
        Ok(summary)
    }

    async fn run_sequential(
        &self,
        feature: &str,
        summary: &mut RunSummary,
    ) -> Result<(), CascadeError> {
        loop {
            let Some(doc) = self.next_iteration(summary)? else {
                break;
            };
            let entry = match find_next_executable(&doc.entries) {
                Selection::Exhausted => break,
                Selection::Blocked(reason) => {
                    summary.paused_reason = Some(reason.to_string());
                    break;
                }
                Selection::Ready(entry) => entry,
            };

            if let Step::Pause(reason) = self.run_entry(&doc, &entry, feature, summary).await? {
                summary.paused_reason = Some(reason);
                break;
            }
        }
        Ok(())
    }

    /// Start-of-iteration bookkeeping shared by both modes: cancellation,
    /// a fresh table read and the safety cap. `None` means stop.
    pub(crate) fn next_iteration(
        &self,
        summary: &mut RunSummary,
    ) -> Result<Option<PlanDocument>, CascadeError> {
        if self.sessions.load()?.is_some_and(|s| s.is_cancelled()) {
            summary.paused_reason = Some("cancelled by operator".to_string());
            return Ok(None);
        }

        let doc = self.store.load()?;
        summary.iterations += 1;
        let cap = safety_cap(doc.entries.len(), self.config.toml.scheduler.safety_margin);
        if summary.iterations > cap {
            return Err(CascadeError::SafetyCapExceeded { cap });
        }
        Ok(Some(doc))
    }

    async fn run_entry(
        &self,
        doc: &PlanDocument,
        entry: &ExecutionTableEntry,
        feature: &str,
        summary: &mut RunSummary,
    ) -> Result<Step, CascadeError> {
        let pre = self.verifier.verify_prerequisites(entry, &doc.contracts);
        log_warnings(&entry.seq, &pre);
        if !pre.is_satisfied() {
            return self.handle_missing_prerequisites(doc, entry, &pre).await;
        }

        let branch = child_branch_name(feature, &entry.seq, &entry.child_id())?;
        self.branches.create_child_branch(&branch, feature).await?;
        self.start_entry(entry, &branch).await?;

        let request = ExecutionRequest {
            seq: entry.seq.clone(),
            child_path: self.children_dir.join(&entry.path),
            workdir: self.config.project_dir.clone(),
            branch: branch.clone(),
        };
        let outcome = execute(self.executor.as_ref(), &request).await;
        self.branches
            .commit_all(&self.config.project_dir, &commit_message(entry))
            .await?;

        if !outcome.success {
            tracing::warn!(seq = %entry.seq, exit_code = ?outcome.exit_code, "Executor failed");
            self.branches.checkout(feature).await?;
            self.finish_entry(entry, EntryStatus::Failed).await?;
            return Ok(Step::Continue);
        }

        let post = self.verifier.verify_provides(entry, &doc.contracts);
        log_warnings(&entry.seq, &post);
        if !post.is_satisfied() {
            tracing::warn!(
                seq = %entry.seq,
                missing = %post.missing_summary(),
                "Entry ran but did not provide everything it promised"
            );
            self.branches.checkout(feature).await?;
            self.finish_entry(entry, EntryStatus::Partial).await?;
            return Ok(Step::Continue);
        }

        self.merge_child(entry, &branch, feature, summary).await
    }

    /// Route a prerequisite failure through the resolution engine.
    pub(crate) async fn handle_missing_prerequisites(
        &self,
        doc: &PlanDocument,
        entry: &ExecutionTableEntry,
        report: &VerificationReport,
    ) -> Result<Step, CascadeError> {
        let missing = report.missing_artifacts();
        tracing::warn!(seq = %entry.seq, missing = %report.missing_summary(), "Prerequisites missing");
        self.events
            .emit(RunEvent::PrerequisitesMissing {
                seq: entry.seq.clone(),
                missing: missing.iter().map(|a| a.to_string()).collect(),
            })
            .await;

        let outcome = self
            .resolution
            .resolve(&self.store, &doc.contracts, entry, &missing)?;
        self.events
            .emit(RunEvent::Resolution {
                seq: entry.seq.clone(),
                outcome: outcome.to_string(),
            })
            .await;

        match outcome {
            ResolutionOutcome::Paused { reason } => {
                let violation = CascadeError::ContractViolation {
                    seq: entry.seq.clone(),
                    missing: report.missing_summary(),
                };
                Ok(Step::Pause(format!("{}; {}", violation, reason)))
            }
            ResolutionOutcome::Skipped { seqs } => {
                for seq in seqs {
                    self.events
                        .emit(RunEvent::EntryFinished {
                            seq,
                            status: EntryStatus::Skipped.to_string(),
                        })
                        .await;
                }
                Ok(Step::Continue)
            }
            ResolutionOutcome::Requeued { .. } => Ok(Step::Continue),
        }
    }

    pub(crate) async fn start_entry(
        &self,
        entry: &ExecutionTableEntry,
        branch: &str,
    ) -> Result<(), CascadeError> {
        let now = now_timestamp();
        self.store.update_entry(&entry.seq, |e| e.mark_started(&now))?;
        self.sessions
            .update(|s| s.current_child = Some(entry.seq.clone()))?;
        tracing::info!(seq = %entry.seq, branch, "Entry started");
        self.events
            .emit(RunEvent::EntryStarted {
                seq: entry.seq.clone(),
                branch: branch.to_string(),
            })
            .await;
        Ok(())
    }

    /// Move an `in_progress` entry to a terminal status.
    pub(crate) async fn finish_entry(
        &self,
        entry: &ExecutionTableEntry,
        status: EntryStatus,
    ) -> Result<(), CascadeError> {
        let now = now_timestamp();
        let updated = self.store.update_entry(&entry.seq, |e| {
            if e.status.can_transition_to(&status) {
                e.mark_finished(status.clone(), &now);
            } else {
                tracing::warn!(
                    seq = %e.seq,
                    from = %e.status,
                    to = %status,
                    "Ignoring invalid status transition"
                );
            }
        })?;
        self.sessions.update(|s| s.current_child = None)?;
        tracing::info!(seq = %updated.seq, status = %updated.status, "Entry finished");
        self.events
            .emit(RunEvent::EntryFinished {
                seq: updated.seq.clone(),
                status: updated.status.to_string(),
            })
            .await;
        Ok(())
    }

    async fn complete_entry(
        &self,
        entry: &ExecutionTableEntry,
        branch: &str,
        summary: &mut RunSummary,
    ) -> Result<(), CascadeError> {
        self.events
            .emit(RunEvent::Merged {
                seq: entry.seq.clone(),
                branch: branch.to_string(),
            })
            .await;
        self.finish_entry(entry, EntryStatus::Completed).await?;
        self.resolution.clear(&entry.seq)?;
        summary.merged_branches.push(branch.to_string());
        Ok(())
    }

    /// Merge a finished child into the feature branch, asking the operator
    /// on conflict.
    pub(crate) async fn merge_child(
        &self,
        entry: &ExecutionTableEntry,
        branch: &str,
        feature: &str,
        summary: &mut RunSummary,
    ) -> Result<Step, CascadeError> {
        let files = match self.branches.merge_no_ff(branch, feature).await? {
            MergeOutcome::Merged => {
                self.complete_entry(entry, branch, summary).await?;
                return Ok(Step::Continue);
            }
            MergeOutcome::Conflict { files } => files,
        };

        self.events
            .emit(RunEvent::MergeConflict {
                seq: entry.seq.clone(),
                branch: branch.to_string(),
                files: files.clone(),
            })
            .await;
        let decision = self.prompt.resolve_conflict(&ConflictContext {
            seq: &entry.seq,
            branch,
            target: feature,
            files: &files,
        })?;

        let resolution = match self.branches.resolve_conflict(decision, &files).await {
            Ok(resolution) => resolution,
            Err(e) => {
                // the merge was rolled back, same as an operator abort
                tracing::warn!(seq = %entry.seq, branch, error = %e, "Conflict resolution failed");
                ConflictResolution::Aborted
            }
        };
        match resolution {
            ConflictResolution::Resolved(_) => {
                self.complete_entry(entry, branch, summary).await?;
                Ok(Step::Continue)
            }
            ConflictResolution::Aborted => {
                self.finish_entry(entry, EntryStatus::Failed).await?;
                Ok(Step::Continue)
            }
            ConflictResolution::Paused { files } => {
                self.sessions.update(|s| {
                    s.pending_merge = Some(PendingMerge {
                        seq: entry.seq.clone(),
                        branch: branch.to_string(),
                    })
                })?;
                let conflict = CascadeError::MergeConflict {
                    branch: branch.to_string(),
                    target: feature.to_string(),
                    files,
                };
                Ok(Step::Pause(conflict.to_string()))
            }
        }
    }

    /// Settle a merge the operator finished by hand while the run was paused.
    async fn reconcile_pending_merge(
        &self,
        pending: &PendingMerge,
        feature: &str,
        summary: &mut RunSummary,
    ) -> Result<(), CascadeError> {
        let merged = self.branches.branch_exists(&pending.branch)
            && self.branches.is_merged_into(&pending.branch, feature)?;
        if merged {
            let now = now_timestamp();
            self.store.update_entry(&pending.seq, |e| {
                if e.status == EntryStatus::Pending {
                    e.mark_started(&now);
                }
                if e.status == EntryStatus::InProgress {
                    e.mark_finished(EntryStatus::Completed, &now);
                }
            })?;
            self.resolution.clear(&pending.seq)?;
            summary.merged_branches.push(pending.branch.clone());
            tracing::info!(seq = %pending.seq, branch = %pending.branch, "Manual merge detected");
        } else {
            tracing::warn!(
                seq = %pending.seq,
                branch = %pending.branch,
                "Paused merge was not completed; the entry will run again"
            );
        }
        self.sessions.update(|s| s.pending_merge = None)?;
        Ok(())
    }
}

/// Run the executor; an executor error counts as a failed run.
pub(crate) async fn execute(
    executor: &dyn ChildExecutor,
    request: &ExecutionRequest,
) -> ExecutionOutcome {
    match executor.execute(request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(seq = %request.seq, error = %e, "Executor could not run");
            ExecutionOutcome::failure(format!("{:#}", e))
        }
    }
}

pub(crate) fn commit_message(entry: &ExecutionTableEntry) -> String {
    format!("cascade: {} {}", entry.seq, entry.child_id())
}

fn log_warnings(seq: &str, report: &VerificationReport) {
    for warning in &report.warnings {
        tracing::warn!(seq, "{}", warning);
    }
}

fn session_error(err: anyhow::Error) -> CascadeError {
    match err.downcast::<SessionError>() {
        Ok(session) => CascadeError::Session(session),
        Err(other) => CascadeError::Other(other),
    }
}

fn pull_request_body(plan: &str, summary: &RunSummary) -> String {
    let mut body = format!(
        "Executed {} entries from `{}`.\n\nMerged branches:\n",
        summary.total, plan
    );
    for branch in &summary.merged_branches {
        body.push_str(&format!("- `{}`\n", branch));
    }
    body
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gates::{ConflictDecision, FixedPrompt};
    use crate::git::manager::tests::init_repo;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Writes a fixed set of files into the working directory per seq.
    #[derive(Default)]
    pub(crate) struct FakeExecutor {
        pub writes: HashMap<String, Vec<(String, String)>>,
        pub removes: HashMap<String, Vec<String>>,
        pub fail: Vec<String>,
    }

    impl FakeExecutor {
        pub fn write(mut self, seq: &str, file: &str, content: &str) -> Self {
            self.writes
                .entry(seq.to_string())
                .or_default()
                .push((file.to_string(), content.to_string()));
            self
        }

        pub fn remove(mut self, seq: &str, file: &str) -> Self {
            self.removes
                .entry(seq.to_string())
                .or_default()
                .push(file.to_string());
            self
        }

        pub fn failing(mut self, seq: &str) -> Self {
            self.fail.push(seq.to_string());
            self
        }
    }

    #[async_trait]
    impl ChildExecutor for FakeExecutor {
        async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome> {
            assert!(request.child_path.exists(), "child document must exist");
            for (file, content) in self.writes.get(&request.seq).into_iter().flatten() {
                fs::write(request.workdir.join(file), content)?;
            }
            for file in self.removes.get(&request.seq).into_iter().flatten() {
                fs::remove_file(request.workdir.join(file))?;
            }
            if self.fail.contains(&request.seq) {
                return Ok(ExecutionOutcome::failure("boom"));
            }
            Ok(ExecutionOutcome::success())
        }
    }

    pub(crate) struct Fixture {
        pub repo: TempDir,
        pub plans: TempDir,
    }

    impl Fixture {
        /// Repository plus a plan directory holding `plan.md` and one child
        /// document per `(file, body)`.
        pub fn new(plan: &str, children: &[(&str, &str)]) -> Self {
            let repo = init_repo();
            let plans = tempfile::tempdir().unwrap();
            fs::write(plans.path().join("plan.md"), plan).unwrap();
            for (file, body) in children {
                fs::write(plans.path().join(file), body).unwrap();
            }
            Self { repo, plans }
        }

        pub fn plan_path(&self) -> PathBuf {
            self.plans.path().join("plan.md")
        }

        pub fn orchestrator(
            &self,
            options: impl FnOnce(&mut RunOptions),
            executor: impl ChildExecutor + 'static,
        ) -> Orchestrator {
            let _guard = crate::config::tests::ENV_MUTEX
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let config = CascadeConfig::new(self.repo.path().to_path_buf()).unwrap();
            let mut opts = RunOptions::from_config(&config);
            opts.push = false;
            options(&mut opts);
            Orchestrator::new(config, &self.plan_path(), opts, Arc::new(executor))
                .unwrap()
                .with_prompt(Box::new(FixedPrompt(ConflictDecision::Pause)))
        }

        pub fn config_dir(&self) -> PathBuf {
            self.repo.path().join(".cascade")
        }

        pub fn entries(&self) -> Vec<ExecutionTableEntry> {
            PlanStore::new(self.plan_path()).load_entries().unwrap()
        }

        pub fn repo_file(&self, name: &str) -> Option<String> {
            fs::read_to_string(self.repo.path().join(name)).ok()
        }
    }

    pub(crate) const TWO_STEP: &str = "# Plan: Demo Run

## Execution Table
| Seq | Child | Status | Depends On | Started | Completed |
|-----|-------|--------|------------|---------|-----------|
| 01 | 01-model.md | pending | — | | |
| 02 | 02-api.md | pending | 01 | | |

## Dependency Contract Matrix
| Child | Requires | Provides |
|-------|----------|----------|
| 01-model | — | file:model.txt |
| 02-api | file:model.txt | file:api.txt |
";

    pub(crate) const CHILDREN: &[(&str, &str)] = &[
        ("01-model.md", "# Model\n\nDefine the persisted record shape.\n"),
        ("02-api.md", "# API\n\nServe handlers over the record.\n"),
    ];

    #[tokio::test]
    async fn test_sequential_run_completes_and_merges() {
        let fx = Fixture::new(TWO_STEP, CHILDREN);
        let executor = FakeExecutor::default()
            .write("01", "model.txt", "model\n")
            .write("02", "api.txt", "api\n");
        let orchestrator = fx.orchestrator(|_| {}, executor);

        let summary = orchestrator.run().await.unwrap();
        assert!(summary.all_completed(), "{:?}", summary);
        assert_eq!(summary.feature_branch, "feat/demo-run");
        assert_eq!(
            summary.merged_branches,
            vec!["feat/demo-run--01-model", "feat/demo-run--02-api"]
        );

        let entries = fx.entries();
        assert!(entries.iter().all(|e| e.status == EntryStatus::Completed));
        assert!(entries.iter().all(|e| e.completed.is_some()));

        let branches = BranchManager::new(fx.repo.path(), "origin");
        assert_eq!(branches.current_branch().unwrap(), "feat/demo-run");
        assert!(!branches.branch_exists("feat/demo-run--01-model"));
        assert_eq!(fx.repo_file("api.txt").as_deref(), Some("api\n"));
        assert!(fx.repo.path().join(".cascade/execution.json").exists());
        assert!(fx.repo.path().join(".cascade/coherence-report.md").exists());

        let session = SessionManager::new(fx.config_dir()).load().unwrap().unwrap();
        assert!(!session.active);
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_provides_marks_partial_and_blocks_dependents() {
        let fx = Fixture::new(TWO_STEP, CHILDREN);
        let executor = FakeExecutor::default().write("01", "other.txt", "x\n");
        let orchestrator = fx.orchestrator(|_| {}, executor);

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.partial, 1);
        assert_eq!(summary.pending, 1);
        let reason = summary.paused_reason.unwrap();
        assert!(reason.contains("01"), "{}", reason);
        assert!(reason.contains("partial"), "{}", reason);

        let entries = fx.entries();
        assert_eq!(entries[0].status, EntryStatus::Partial);
        assert_eq!(entries[1].status, EntryStatus::Pending);
    }

    #[tokio::test]
    async fn test_executor_failure_marks_failed() {
        let fx = Fixture::new(TWO_STEP, CHILDREN);
        let executor = FakeExecutor::default().failing("01");
        let orchestrator = fx.orchestrator(|_| {}, executor);

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(fx.entries()[0].status, EntryStatus::Failed);

        let session = SessionManager::new(fx.config_dir()).load().unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
    }

    #[tokio::test]
    async fn test_missing_prerequisite_pauses_with_pause_strategy() {
        let plan = TWO_STEP.replace("| 01 | 01-model.md | pending", "| 01 | 01-model.md | completed");
        let fx = Fixture::new(&plan, CHILDREN);
        let orchestrator = fx.orchestrator(|_| {}, FakeExecutor::default());

        let summary = orchestrator.run().await.unwrap();
        let reason = summary.paused_reason.unwrap();
        assert!(reason.contains("Entry 02 is missing required artifact(s): file:model.txt"), "{}", reason);
        assert_eq!(fx.entries()[1].status, EntryStatus::Pending);
    }

    #[tokio::test]
    async fn test_self_heal_requeues_provider_then_completes() {
        let plan = TWO_STEP.replace("| 01 | 01-model.md | pending", "| 01 | 01-model.md | completed");
        let fx = Fixture::new(&plan, CHILDREN);
        let executor = FakeExecutor::default()
            .write("01", "model.txt", "model\n")
            .write("02", "api.txt", "api\n");
        let orchestrator = fx.orchestrator(|o| o.strategy = ResolutionStrategy::SelfHeal, executor);

        let summary = orchestrator.run().await.unwrap();
        assert!(summary.all_completed(), "{:?}", summary);

        let child = fs::read_to_string(fx.plans.path().join("01-model.md")).unwrap();
        assert!(child.contains("- [ ] Repair: provide file:model.txt (required by 02)"));
    }

    #[tokio::test]
    async fn test_blocking_coherence_errors_stop_the_run() {
        let plan = TWO_STEP.replace("| 02-api | file:model.txt |", "| 02-api | file:schema.sql |");
        let fx = Fixture::new(&plan, CHILDREN);
        let orchestrator = fx.orchestrator(|_| {}, FakeExecutor::default());

        let err = orchestrator.run().await.unwrap_err();
        assert!(matches!(err, CascadeError::Validation { errors: 1, .. }), "{}", err);
        assert!(fx.repo.path().join(".cascade/coherence-report.json").exists());
        assert_eq!(fx.entries()[0].status, EntryStatus::Pending);
    }

    #[tokio::test]
    async fn test_live_owner_conflict() {
        let fx = Fixture::new(TWO_STEP, CHILDREN);
        let orchestrator = fx.orchestrator(|_| {}, FakeExecutor::default());
        let config_dir = fx.config_dir();
        let mut state = SessionState::new(
            orchestrator.store().plan_path().to_path_buf(),
            fx.plans.path().to_path_buf(),
            config_dir.clone(),
        );
        state.owner_pid = 1;
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(
            config_dir.join("session.json"),
            serde_json::to_string(&state).unwrap(),
        )
        .unwrap();

        let err = orchestrator.run().await.unwrap_err();
        assert!(
            matches!(err, CascadeError::Session(SessionError::Conflict { pid: 1, .. })),
            "{}",
            err
        );
    }

    /// Cancels the session from inside the first execution.
    struct CancellingExecutor {
        config_dir: PathBuf,
    }

    #[async_trait]
    impl ChildExecutor for CancellingExecutor {
        async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome> {
            fs::write(request.workdir.join("model.txt"), "model\n")?;
            SessionManager::new(&self.config_dir).cancel()?;
            Ok(ExecutionOutcome::success())
        }
    }

    #[tokio::test]
    async fn test_cancelled_session_stops_before_next_entry() {
        let fx = Fixture::new(TWO_STEP, CHILDREN);
        let executor = CancellingExecutor {
            config_dir: fx.config_dir(),
        };
        let orchestrator = fx.orchestrator(|_| {}, executor);

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.paused_reason.as_deref(), Some("cancelled by operator"));
        assert_eq!(summary.completed, 1);
        assert_eq!(fx.entries()[1].status, EntryStatus::Pending);

        let session = SessionManager::new(fx.config_dir()).load().unwrap().unwrap();
        assert!(!session.active);
        assert_eq!(session.status, SessionStatus::Cancelled);
    }
}
