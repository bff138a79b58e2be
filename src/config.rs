//! Configuration system for cascade.
//!
//! Reads `.cascade/cascade.toml` and layers it file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! trunk = "main"
//! remote = "origin"
//!
//! [executor]
//! command = "my-agent"
//! args = ["--plan", "{child}", "--cwd", "{workdir}"]
//!
//! [resolution]
//! strategy = "self-heal"
//! max_prerequisite_failures = 2
//! max_backtracks = 1
//! cascade_skip = false
//!
//! [coherence]
//! coverage_threshold = 0.6
//! duplicate_threshold = 0.8
//! block_on_errors = true
//!
//! [branches]
//! prefix = "feat"
//! cleanup = true
//! push = true
//! create_pr = false
//! conflict_policy = "prompt"
//!
//! [parallel]
//! enabled = false
//! max_parallel = 4
//! worktree_dir = ".cascade/worktrees"
//!
//! [scheduler]
//! safety_margin = 10
//!
//! [verification]
//! source_extensions = ["rs", "ts", "tsx", "js", "py"]
//! exclude_dirs = [".git", "node_modules", "target"]
//! migration_dirs = ["migrations"]
//! max_file_bytes = 1048576
//! ```
//!
//! Environment overrides: `CASCADE_EXECUTOR_CMD` (executor command) and
//! `CASCADE_TRUNK` (trunk branch).

use crate::git::branch::validate_branch_name;
use crate::resolution::ResolutionStrategy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_DIR: &str = ".cascade";
pub const CONFIG_FILE: &str = "cascade.toml";

/// Project-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Branch the feature branch starts from and is rebased onto
    #[serde(default = "default_trunk")]
    pub trunk: String,
    #[serde(default = "default_remote")]
    pub remote: String,
}

fn default_trunk() -> String {
    "main".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            trunk: default_trunk(),
            remote: default_remote(),
        }
    }
}

/// External child executor invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Program to run for each child plan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Argument vector; `{child}`, `{seq}` and `{workdir}` are substituted
    #[serde(default = "default_executor_args")]
    pub args: Vec<String>,
}

fn default_executor_args() -> Vec<String> {
    vec!["{child}".to_string()]
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            command: None,
            args: default_executor_args(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionSection {
    #[serde(default)]
    pub strategy: ResolutionStrategy,
    /// Prerequisite failures tolerated before a forced pause
    #[serde(default = "default_max_prerequisite_failures")]
    pub max_prerequisite_failures: u32,
    #[serde(default = "default_max_backtracks")]
    pub max_backtracks: u32,
    /// Skip every pending transitive dependent along with a skipped entry
    #[serde(default)]
    pub cascade_skip: bool,
}

fn default_max_prerequisite_failures() -> u32 {
    2
}

fn default_max_backtracks() -> u32 {
    1
}

impl Default for ResolutionSection {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::default(),
            max_prerequisite_failures: default_max_prerequisite_failures(),
            max_backtracks: default_max_backtracks(),
            cascade_skip: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceSection {
    /// Minimum word overlap for a parent criterion to count as covered
    #[serde(default = "default_coverage_threshold")]
    pub coverage_threshold: f64,
    /// Jaccard similarity above which two child criteria are duplicates
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,
    /// Refuse to run while the audit reports errors
    #[serde(default = "default_true")]
    pub block_on_errors: bool,
}

fn default_coverage_threshold() -> f64 {
    0.6
}

fn default_duplicate_threshold() -> f64 {
    0.8
}

fn default_true() -> bool {
    true
}

impl Default for CoherenceSection {
    fn default() -> Self {
        Self {
            coverage_threshold: default_coverage_threshold(),
            duplicate_threshold: default_duplicate_threshold(),
            block_on_errors: true,
        }
    }
}

/// How merge conflicts are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Ask the operator when a terminal is attached, pause otherwise
    #[default]
    Prompt,
    /// Always leave the conflict in place and pause
    Pause,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::Prompt => write!(f, "prompt"),
            ConflictPolicy::Pause => write!(f, "pause"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchesSection {
    #[serde(default = "default_branch_prefix")]
    pub prefix: String,
    /// Delete child branches after a successful merge
    #[serde(default = "default_true")]
    pub cleanup: bool,
    #[serde(default = "default_true")]
    pub push: bool,
    /// Open a pull request with `gh` after pushing
    #[serde(default)]
    pub create_pr: bool,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

fn default_branch_prefix() -> String {
    "feat".to_string()
}

impl Default for BranchesSection {
    fn default() -> Self {
        Self {
            prefix: default_branch_prefix(),
            cleanup: true,
            push: true,
            create_pr: false,
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Worktree root, relative to the project directory
    #[serde(default = "default_worktree_dir")]
    pub worktree_dir: String,
}

fn default_max_parallel() -> usize {
    4
}

fn default_worktree_dir() -> String {
    format!("{}/worktrees", CONFIG_DIR)
}

impl Default for ParallelSection {
    fn default() -> Self {
        Self {
            enabled: false,
            max_parallel: default_max_parallel(),
            worktree_dir: default_worktree_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Extra iterations allowed beyond the number of entries
    #[serde(default = "default_safety_margin")]
    pub safety_margin: usize,
}

fn default_safety_margin() -> usize {
    10
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            safety_margin: default_safety_margin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSection {
    /// File extensions scanned for export, type and endpoint artifacts
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    #[serde(default = "default_migration_dirs")]
    pub migration_dirs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_source_extensions() -> Vec<String> {
    [
        "rs", "ts", "tsx", "js", "jsx", "mjs", "cjs", "py", "go", "java", "kt", "rb", "sql",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_exclude_dirs() -> Vec<String> {
    [".git", "node_modules", "target", CONFIG_DIR, "dist", "build"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_migration_dirs() -> Vec<String> {
    [
        "migrations",
        "db/migrations",
        "prisma/migrations",
        "supabase/migrations",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

impl Default for VerificationSection {
    fn default() -> Self {
        Self {
            source_extensions: default_source_extensions(),
            exclude_dirs: default_exclude_dirs(),
            migration_dirs: default_migration_dirs(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

/// Root of `.cascade/cascade.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CascadeToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub resolution: ResolutionSection,
    #[serde(default)]
    pub coherence: CoherenceSection,
    #[serde(default)]
    pub branches: BranchesSection,
    #[serde(default)]
    pub parallel: ParallelSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub verification: VerificationSection,
}

impl CascadeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse cascade.toml")
    }

    /// Load from `<config_dir>/cascade.toml`, or defaults if it doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize cascade.toml")?;
        crate::util::write_atomic(path, content.as_bytes())
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Executor program (file → env). `None` when neither sets one.
    pub fn executor_cmd(&self) -> Option<String> {
        std::env::var("CASCADE_EXECUTOR_CMD")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.executor.command.clone())
    }

    /// Trunk branch, with the environment overriding the file.
    pub fn trunk(&self) -> String {
        std::env::var("CASCADE_TRUNK")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.project.trunk.clone())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (name, value) in [
            ("coverage_threshold", self.coherence.coverage_threshold),
            ("duplicate_threshold", self.coherence.duplicate_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                warnings.push(format!(
                    "Invalid coherence.{} {}: must be in (0, 1]",
                    name, value
                ));
            }
        }

        if self.parallel.max_parallel == 0 {
            warnings.push("parallel.max_parallel is 0; waves would never run".to_string());
        }

        if let Err(e) = validate_branch_name(&self.branches.prefix) {
            warnings.push(format!("Invalid branches.prefix: {}", e));
        }
        if let Err(e) = validate_branch_name(&self.project.trunk) {
            warnings.push(format!("Invalid project.trunk: {}", e));
        }

        if self.executor.command.is_none() && std::env::var("CASCADE_EXECUTOR_CMD").is_err() {
            warnings.push(
                "No executor configured; set executor.command or CASCADE_EXECUTOR_CMD".to_string(),
            );
        }

        warnings
    }
}

/// Unified configuration for a cascade invocation.
///
/// It merges settings from:
/// 1. cascade.toml file
/// 2. Environment variables
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub project_dir: PathBuf,
    /// Path to the .cascade directory
    pub config_dir: PathBuf,
    pub toml: CascadeToml,
    pub verbose: bool,
    /// Auto-confirm prompts
    pub yes: bool,
}

impl CascadeConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let toml = CascadeToml::load_or_default(&config_dir)?;

        Ok(Self {
            project_dir,
            config_dir,
            toml,
            verbose: false,
            yes: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool, yes: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.yes = yes;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn session_file(&self) -> PathBuf {
        self.config_dir.join("session.json")
    }

    pub fn mirror_file(&self) -> PathBuf {
        self.config_dir.join("execution.json")
    }

    pub fn resolution_file(&self) -> PathBuf {
        self.config_dir.join("resolution.json")
    }

    pub fn report_json(&self) -> PathBuf {
        self.config_dir.join("coherence-report.json")
    }

    pub fn report_markdown(&self) -> PathBuf {
        self.config_dir.join("coherence-report.md")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config_dir.join("logs")
    }

    pub fn worktree_dir(&self) -> PathBuf {
        self.project_dir.join(&self.toml.parallel.worktree_dir)
    }

    pub fn trunk(&self) -> String {
        self.toml.trunk()
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
