//! The boundary to whatever performs the work of a child plan.

use crate::config::CascadeToml;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// One unit of work handed to an executor.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub seq: String,
    /// Absolute path of the child plan document
    pub child_path: PathBuf,
    /// Directory the executor must work in (repo root or wave worktree)
    pub workdir: PathBuf,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Last lines of combined output, for reporting
    pub output_tail: String,
}

impl ExecutionOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            output_tail: String::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: None,
            output_tail: message.into(),
        }
    }
}

/// Performs the work of a child plan in `request.workdir`.
#[async_trait]
pub trait ChildExecutor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome>;
}

const TAIL_LINES: usize = 20;

/// Runs a configured program once per child.
///
/// `{child}`, `{seq}` and `{workdir}` in the argument list are replaced per
/// request. The program is spawned directly, never through a shell.
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    log_dir: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            log_dir: None,
        }
    }

    /// Build from `[executor]`. A command with spaces is split into the
    /// program and leading arguments.
    pub fn from_config(toml: &CascadeToml) -> Result<Self> {
        let Some(command) = toml.executor_cmd() else {
            bail!(
                "No executor configured; set [executor] command in cascade.toml or CASCADE_EXECUTOR_CMD"
            );
        };
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next().context("Executor command is empty")?;
        let mut args: Vec<String> = parts.collect();
        args.extend(toml.executor.args.iter().cloned());
        Ok(Self::new(program, args))
    }

    /// Keep a full output log per child in this directory.
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(log_dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Argument vector with placeholders substituted.
    pub fn render_args(&self, request: &ExecutionRequest) -> Vec<String> {
        let child = request.child_path.to_string_lossy();
        let workdir = request.workdir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{child}", &child)
                    .replace("{seq}", &request.seq)
                    .replace("{workdir}", &workdir)
            })
            .collect()
    }
}

#[async_trait]
impl ChildExecutor for CommandExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome> {
        let args = self.render_args(request);
        tracing::info!(seq = %request.seq, program = %self.program, ?args, "Spawning executor");
        let start = Instant::now();

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(&request.workdir)
            .env("CASCADE_SEQ", &request.seq)
            .env("CASCADE_BRANCH", &request.branch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn executor '{}'", self.program))?;

        let stdout = child.stdout.take().context("Failed to get executor stdout")?;
        let stderr = child.stderr.take().context("Failed to get executor stderr")?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected
        });

        let mut output = Vec::new();
        let mut reader = BufReader::new(stdout).lines();
        while let Some(line) = reader.next_line().await? {
            tracing::debug!(seq = %request.seq, "{}", line);
            output.push(line);
        }

        let status = child.wait().await.context("Failed to wait for executor")?;
        output.extend(stderr_task.await.unwrap_or_default());

        if let Some(log_dir) = &self.log_dir {
            tokio::fs::create_dir_all(log_dir).await.ok();
            let path = log_dir.join(format!("executor-{}.log", request.seq));
            let mut file = tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            file.write_all(output.join("\n").as_bytes()).await?;
        }

        let tail_start = output.len().saturating_sub(TAIL_LINES);
        let outcome = ExecutionOutcome {
            success: status.success(),
            exit_code: status.code(),
            output_tail: output[tail_start..].join("\n"),
        };
        tracing::info!(
            seq = %request.seq,
            success = outcome.success,
            exit_code = ?outcome.exit_code,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Executor finished"
        );
        Ok(outcome)
    }
}
