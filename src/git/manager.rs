//! Branch lifecycle: feature and child branches, merges, finalize, cleanup.
//!
//! All git invocations go through `tokio::process::Command` with argument
//! vectors; nothing is passed through a shell. Read-only lookups (current
//! branch, branch existence) use `git2`.

use crate::errors::BranchError;
use crate::gates::ConflictDecision;
use crate::git::branch::{validate_branch_name, validate_tag_name};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;

/// Result of a `--no-ff` merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// The merge stopped with conflicts; the working tree is mid-merge.
    Conflict { files: Vec<String> },
}

/// What happened after an operator decision on a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Conflict left in place for manual resolution.
    Paused { files: Vec<String> },
    /// Conflict resolved by taking one side and committing the merge.
    Resolved(ConflictDecision),
    /// Merge aborted; the target branch is unchanged.
    Aborted,
}

#[derive(Debug, Clone, Default)]
pub struct FinalizeOptions {
    pub push: bool,
    pub create_pr: bool,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeOutcome {
    /// `true` if the feature branch was rebased, `false` if trunk was merged in.
    pub rebased: bool,
    pub pushed: bool,
    pub pr_url: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum MergeSide {
    Ours,
    Theirs,
}

impl MergeSide {
    fn flag(self) -> &'static str {
        match self {
            Self::Ours => "--ours",
            Self::Theirs => "--theirs",
        }
    }

    fn stage(self) -> u8 {
        match self {
            Self::Ours => 2,
            Self::Theirs => 3,
        }
    }
}

pub struct BranchManager {
    repo_dir: PathBuf,
    remote: String,
}

impl BranchManager {
    pub fn new(repo_dir: impl Into<PathBuf>, remote: &str) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            remote: remote.to_string(),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn run(&self, program: &str, dir: &Path, args: &[&str]) -> Result<Output, BranchError> {
        tracing::debug!(program, ?args, dir = %dir.display(), "Running command");
        Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| BranchError::Spawn {
                program: program.to_string(),
                source,
            })
    }

    /// Run git in `dir`; non-zero exit becomes `BranchError::GitCommand`.
    async fn git_in(&self, dir: &Path, args: &[&str]) -> Result<String, BranchError> {
        let output = self.run("git", dir, args).await?;
        if !output.status.success() {
            return Err(BranchError::GitCommand {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn git(&self, args: &[&str]) -> Result<String, BranchError> {
        self.git_in(&self.repo_dir, args).await
    }

    /// Short name of the checked-out branch.
    pub fn current_branch(&self) -> Result<String, BranchError> {
        let repo = git2::Repository::open(&self.repo_dir)?;
        let head = repo.head()?;
        Ok(head.shorthand().unwrap_or("HEAD").to_string())
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        git2::Repository::open(&self.repo_dir)
            .and_then(|repo| repo.find_branch(name, git2::BranchType::Local).map(|_| ()))
            .is_ok()
    }

    /// Whether `branch` was merged into `target`: reachable from it without
    /// being its tip.
    pub fn is_merged_into(&self, branch: &str, target: &str) -> Result<bool, BranchError> {
        let repo = git2::Repository::open(&self.repo_dir)?;
        let branch_oid = repo
            .find_branch(branch, git2::BranchType::Local)?
            .get()
            .peel_to_commit()?
            .id();
        let target_oid = repo
            .find_branch(target, git2::BranchType::Local)?
            .get()
            .peel_to_commit()?
            .id();
        if branch_oid == target_oid {
            return Ok(false);
        }
        Ok(repo.graph_descendant_of(target_oid, branch_oid)?)
    }

    pub async fn checkout(&self, branch: &str) -> Result<(), BranchError> {
        validate_branch_name(branch)?;
        self.git(&["checkout", branch]).await?;
        Ok(())
    }

    /// Check out `name`, creating it from `base` if it doesn't exist yet.
    pub async fn checkout_or_create(&self, name: &str, base: &str) -> Result<(), BranchError> {
        validate_branch_name(name)?;
        validate_branch_name(base)?;
        if self.branch_exists(name) {
            tracing::debug!(branch = name, "Reusing existing branch");
            self.git(&["checkout", name]).await?;
        } else {
            self.git(&["checkout", "-b", name, base]).await?;
        }
        Ok(())
    }

    pub async fn ensure_feature_branch(&self, feature: &str, trunk: &str) -> Result<(), BranchError> {
        self.checkout_or_create(feature, trunk).await?;
        tracing::info!(branch = feature, trunk, "Feature branch ready");
        Ok(())
    }

    pub async fn create_child_branch(&self, child: &str, feature: &str) -> Result<(), BranchError> {
        self.checkout_or_create(child, feature).await?;
        tracing::info!(branch = child, parent = feature, "Child branch ready");
        Ok(())
    }

    pub async fn has_changes(&self, dir: &Path) -> Result<bool, BranchError> {
        Ok(!self.git_in(dir, &["status", "--porcelain"]).await?.is_empty())
    }

    /// Stage everything in `dir` and commit. Returns `false` on a clean tree.
    pub async fn commit_all(&self, dir: &Path, message: &str) -> Result<bool, BranchError> {
        if !self.has_changes(dir).await? {
            return Ok(false);
        }
        self.git_in(dir, &["add", "-A"]).await?;
        self.git_in(dir, &["commit", "-m", message]).await?;
        Ok(true)
    }

    async fn conflicted_files(&self) -> Result<Vec<String>, BranchError> {
        let out = self
            .git(&["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Merge `branch` into `target` with `--no-ff`.
    ///
    /// Conflicts are reported, not resolved; the tree stays mid-merge until
    /// `resolve_conflict` is called. Non-conflict failures abort the merge.
    pub async fn merge_no_ff(&self, branch: &str, target: &str) -> Result<MergeOutcome, BranchError> {
        validate_branch_name(branch)?;
        validate_branch_name(target)?;
        self.git(&["checkout", target]).await?;

        let message = format!("Merge {} into {}", branch, target);
        let output = self
            .run("git", &self.repo_dir, &["merge", "--no-ff", "-m", message.as_str(), branch])
            .await?;
        if output.status.success() {
            tracing::info!(branch, target, "Merged");
            return Ok(MergeOutcome::Merged);
        }

        let files = self.conflicted_files().await?;
        if files.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if let Err(e) = self.git(&["merge", "--abort"]).await {
                tracing::warn!(error = %e, "merge --abort failed after merge error");
            }
            return Err(BranchError::GitCommand {
                command: format!("merge --no-ff {}", branch),
                stderr,
            });
        }

        tracing::warn!(branch, target, ?files, "Merge conflict");
        Ok(MergeOutcome::Conflict { files })
    }

    /// Apply an operator decision to a conflicted merge.
    pub async fn resolve_conflict(
        &self,
        decision: ConflictDecision,
        files: &[String],
    ) -> Result<ConflictResolution, BranchError> {
        let side = match decision {
            ConflictDecision::Pause => {
                return Ok(ConflictResolution::Paused {
                    files: files.to_vec(),
                });
            }
            ConflictDecision::Abort => {
                self.git(&["merge", "--abort"]).await?;
                return Ok(ConflictResolution::Aborted);
            }
            ConflictDecision::AcceptIncoming => MergeSide::Theirs,
            ConflictDecision::AcceptExisting => MergeSide::Ours,
        };

        if let Err(e) = self.take_side(side, files).await {
            if let Err(abort) = self.git(&["merge", "--abort"]).await {
                tracing::warn!(error = %abort, "merge --abort failed after resolution error");
            }
            return Err(e);
        }
        tracing::info!(?decision, files = files.len(), "Conflict resolved");
        Ok(ConflictResolution::Resolved(decision))
    }

    /// Resolve every file to one side and commit the merge.
    ///
    /// A side without an index stage for a path deleted it (modify/delete),
    /// so taking that side removes the file.
    async fn take_side(&self, side: MergeSide, files: &[String]) -> Result<(), BranchError> {
        for file in files {
            let stages = self.unmerged_stages(file).await?;
            if stages.contains(&side.stage()) {
                self.git(&["checkout", side.flag(), "--", file.as_str()]).await?;
                self.git(&["add", "--", file.as_str()]).await?;
            } else {
                self.git(&["rm", "--quiet", "--", file.as_str()]).await?;
            }
        }
        self.git(&["commit", "--no-edit"]).await?;
        Ok(())
    }

    /// Index stages present for a conflicted path (1 base, 2 ours, 3 theirs).
    async fn unmerged_stages(&self, file: &str) -> Result<Vec<u8>, BranchError> {
        let out = self.git(&["ls-files", "-u", "--", file]).await?;
        Ok(out
            .lines()
            .filter_map(|line| line.split('\t').next())
            .filter_map(|meta| meta.split_whitespace().nth(2))
            .filter_map(|stage| stage.parse().ok())
            .collect())
    }

    pub async fn delete_branch(&self, name: &str) -> Result<(), BranchError> {
        validate_branch_name(name)?;
        self.git(&["branch", "-D", name]).await?;
        Ok(())
    }

    /// Create (or move) a lightweight checkpoint tag at HEAD.
    pub async fn tag(&self, name: &str) -> Result<(), BranchError> {
        validate_tag_name(name)?;
        self.git(&["tag", "-f", name]).await?;
        Ok(())
    }

    /// Add an isolated worktree at `path` on `branch`, created from `base`.
    pub async fn add_worktree(&self, path: &Path, branch: &str, base: &str) -> Result<(), BranchError> {
        validate_branch_name(branch)?;
        validate_branch_name(base)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| BranchError::Spawn {
                program: "mkdir".to_string(),
                source,
            })?;
        }
        let path_str = path.to_string_lossy().to_string();
        if self.branch_exists(branch) {
            self.git(&["worktree", "add", path_str.as_str(), branch]).await?;
        } else {
            self.git(&["worktree", "add", "-b", branch, path_str.as_str(), base])
                .await?;
        }
        Ok(())
    }

    pub async fn remove_worktree(&self, path: &Path) -> Result<(), BranchError> {
        let path_str = path.to_string_lossy().to_string();
        self.git(&["worktree", "remove", "--force", path_str.as_str()])
            .await?;
        Ok(())
    }

    /// Bring the feature branch up to date with trunk.
    ///
    /// Tries a rebase first, keeping the per-child merge commits; on failure
    /// the rebase is aborted and trunk is merged into the feature branch
    /// instead. Returns `true` if rebased.
    pub async fn rebase_or_merge(&self, feature: &str, trunk: &str) -> Result<bool, BranchError> {
        validate_branch_name(feature)?;
        validate_branch_name(trunk)?;
        self.git(&["checkout", feature]).await?;

        match self.git(&["rebase", "--rebase-merges", trunk]).await {
            Ok(_) => {
                tracing::info!(feature, trunk, "Rebased feature branch");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Rebase failed; falling back to merge");
                if let Err(abort) = self.git(&["rebase", "--abort"]).await {
                    tracing::warn!(error = %abort, "rebase --abort failed");
                }
                let message = format!("Merge {} into {}", trunk, feature);
                if let Err(merge_err) = self
                    .git(&["merge", "--no-ff", "-m", message.as_str(), trunk])
                    .await
                {
                    if let Err(abort) = self.git(&["merge", "--abort"]).await {
                        tracing::warn!(error = %abort, "merge --abort failed");
                    }
                    return Err(merge_err);
                }
                Ok(false)
            }
        }
    }

    pub async fn push(&self, branch: &str, force_with_lease: bool) -> Result<(), BranchError> {
        validate_branch_name(branch)?;
        let mut args = vec!["push", "-u"];
        if force_with_lease {
            args.push("--force-with-lease");
        }
        args.push(&self.remote);
        args.push(branch);
        self.git(&args).await?;
        Ok(())
    }

    /// Open a review request with `gh`. Returns the PR URL.
    pub async fn create_pull_request(
        &self,
        branch: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<String, BranchError> {
        validate_branch_name(branch)?;
        validate_branch_name(base)?;
        let output = self
            .run(
                "gh",
                &self.repo_dir,
                &[
                    "pr", "create", "--head", branch, "--base", base, "--title", title, "--body",
                    body,
                ],
            )
            .await?;
        if !output.status.success() {
            return Err(BranchError::GitCommand {
                command: "gh pr create".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Rebase (or merge) onto trunk, then optionally push and open a PR.
    pub async fn finalize(
        &self,
        feature: &str,
        trunk: &str,
        options: &FinalizeOptions,
    ) -> Result<FinalizeOutcome, BranchError> {
        let rebased = self.rebase_or_merge(feature, trunk).await?;
        let mut outcome = FinalizeOutcome {
            rebased,
            ..Default::default()
        };

        if options.push {
            self.push(feature, rebased).await?;
            outcome.pushed = true;
            if options.create_pr {
                let url = self
                    .create_pull_request(feature, trunk, &options.title, &options.body)
                    .await?;
                tracing::info!(url = %url, "Pull request created");
                outcome.pr_url = Some(url);
            }
        }
        Ok(outcome)
    }

    /// Delete merged child branches; failures are logged and skipped.
    pub async fn cleanup(&self, branches: &[String]) -> usize {
        let mut deleted = 0;
        for branch in branches {
            match self.delete_branch(branch).await {
                Ok(()) => deleted += 1,
                Err(e) => tracing::warn!(branch = %branch, error = %e, "Failed to delete branch"),
            }
        }
        deleted
    }
}
