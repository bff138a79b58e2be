//! Typed error hierarchy for the cascade orchestrator.
//!
//! Callers match on these instead of just reporting them:
//! - `CascadeError` - run-level failures that halt orchestration
//! - `DagError` - structural problems in the execution table graph
//! - `BranchError` - rejected branch/reference names and git command failures
//! - `SessionError` - ownership conflicts on the durable session record
//!
//! Parsing and artifact checks never produce these; they return structured
//! negative results (warnings, `VerificationReport`) instead.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop an orchestration run.
#[derive(Debug, Error)]
pub enum CascadeError {
    #[error(
        "Coherence check found {errors} blocking issue(s); see {report}. Fix the plan or rerun `cascade check --fix`"
    )]
    Validation { errors: usize, report: PathBuf },

    #[error("Entry {seq} is missing required artifact(s): {missing}")]
    ContractViolation { seq: String, missing: String },

    #[error("Dependency graph is invalid: {0}")]
    Dag(#[from] DagError),

    #[error(
        "Merge of {branch} into {target} conflicts in {files:?}; resolve manually, commit, then run `cascade run --resume`"
    )]
    MergeConflict {
        branch: String,
        target: String,
        files: Vec<String>,
    },

    #[error(
        "Scheduler exceeded its safety cap of {cap} iterations; the execution table is likely corrupted"
    )]
    SafetyCapExceeded { cap: usize },

    #[error("Every task in wave {wave} failed; aborting")]
    WaveAborted { wave: usize },

    #[error(transparent)]
    Branch(#[from] BranchError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Graph invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("Entry {seq} depends on itself")]
    SelfDependency { seq: String },

    #[error("Entry {seq} depends on unknown entry {dependency}")]
    UnknownDependency { seq: String, dependency: String },

    #[error("Cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Duplicate sequence number {seq}")]
    DuplicateSeq { seq: String },
}

/// Branch and git-reference failures.
#[derive(Debug, Error)]
pub enum BranchError {
    #[error("Rejected branch name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("git {command} failed: {stderr}")]
    GitCommand { command: String, stderr: String },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Repository error: {0}")]
    Repository(#[from] git2::Error),
}

/// Session ownership failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(
        "Plan {plan} is already being orchestrated by live process {pid}; wait for it, run `cascade cancel`, or pass --resume"
    )]
    Conflict { plan: PathBuf, pid: u32 },

    #[error("Session file at {path} is unreadable: {message}")]
    Corrupt { path: PathBuf, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dag_error_cycle_renders_path() {
        let err = DagError::Cycle {
            path: vec!["1".into(), "2".into(), "1".into()],
        };
        assert_eq!(err.to_string(), "Cycle detected: 1 -> 2 -> 1");
    }

    #[test]
    fn cascade_error_converts_from_dag_error() {
        let err: CascadeError = DagError::SelfDependency { seq: "3".into() }.into();
        match &err {
            CascadeError::Dag(DagError::SelfDependency { seq }) => assert_eq!(seq, "3"),
            _ => panic!("Expected CascadeError::Dag(SelfDependency)"),
        }
    }

    #[test]
    fn branch_error_invalid_name_carries_reason() {
        let err = BranchError::InvalidName {
            name: "feat;rm".into(),
            reason: "contains ';'".into(),
        };
        assert!(err.to_string().contains("feat;rm"));
        assert!(err.to_string().contains("contains ';'"));
    }

    #[test]
    fn session_conflict_suggests_remedy() {
        let err = SessionError::Conflict {
            plan: PathBuf::from("plans/auth.md"),
            pid: 4242,
        };
        let msg = err.to_string();
        assert!(msg.contains("4242"));
        assert!(msg.contains("--resume"));
    }

    #[test]
    fn safety_cap_is_matchable() {
        let err = CascadeError::SafetyCapExceeded { cap: 13 };
        assert!(matches!(err, CascadeError::SafetyCapExceeded { cap: 13 }));
        assert!(err.to_string().contains("13"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&CascadeError::WaveAborted { wave: 1 });
        assert_std_error(&DagError::DuplicateSeq { seq: "1".into() });
        assert_std_error(&BranchError::GitCommand {
            command: "merge".into(),
            stderr: "conflict".into(),
        });
    }
}
