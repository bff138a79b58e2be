use anyhow::{Context, Result};
use cascade::config::CONFIG_DIR;
use cascade::resolution::ResolutionStrategy;
use cascade::ui::UiMode;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(version, about = "Execute decomposed plans through verified, merge-safe child branches")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Auto-confirm prompts
    #[arg(long, global = true)]
    pub yes: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .cascade/ with a default cascade.toml
    Init,
    /// Audit a plan and its child documents before execution
    Check {
        plan: PathBuf,
        /// Directory child references resolve against (defaults to the plan's directory)
        #[arg(long)]
        children_dir: Option<PathBuf>,
        /// Apply mechanical fixes to the execution table
        #[arg(long)]
        fix: bool,
    },
    /// Execute a plan
    Run(RunArgs),
    /// Show which entry would run next
    Next { plan: PathBuf },
    /// Show the parallel waves of a plan
    Waves { plan: PathBuf },
    /// Check one entry's contract against the working tree
    Verify {
        plan: PathBuf,
        seq: String,
        /// Check what the entry provides instead of what it requires
        #[arg(long)]
        provides: bool,
    },
    /// Show the current session and table progress
    Status,
    /// Ask a running session to stop after its current step
    Cancel,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Args, Clone)]
pub struct RunArgs {
    pub plan: PathBuf,

    /// Run independent entries concurrently in waves
    #[arg(long)]
    pub parallel: bool,

    /// Maximum concurrent executors in a wave
    #[arg(long)]
    pub max_parallel: Option<usize>,

    /// Resolution strategy for missing prerequisites
    #[arg(long, value_enum)]
    pub strategy: Option<ResolutionStrategy>,

    /// Continue a paused or interrupted session
    #[arg(long)]
    pub resume: bool,

    /// Directory child references resolve against (defaults to the plan's directory)
    #[arg(long)]
    pub children_dir: Option<PathBuf>,

    /// Don't push the feature branch or open a pull request
    #[arg(long)]
    pub no_push: bool,

    /// Keep merged child branches
    #[arg(long)]
    pub no_cleanup: bool,

    /// UI output mode
    #[arg(long, value_enum, default_value = "full")]
    pub ui: UiMode,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default cascade.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let config_dir = project_dir.join(CONFIG_DIR);
    let log_dir = config_dir.is_dir().then(|| config_dir.join("logs"));
    let _log_guard = cascade::logging::init(cli.verbose, log_dir.as_deref());

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Check {
            plan,
            children_dir,
            fix,
        } => cmd::cmd_check(&project_dir, plan, children_dir.as_deref(), *fix)?,
        Commands::Run(args) => cmd::cmd_run(&cli, project_dir, args).await?,
        Commands::Next { plan } => cmd::cmd_next(plan)?,
        Commands::Waves { plan } => cmd::cmd_waves(plan)?,
        Commands::Verify {
            plan,
            seq,
            provides,
        } => cmd::cmd_verify(&project_dir, plan, seq, *provides)?,
        Commands::Status => cmd::cmd_status(&project_dir)?,
        Commands::Cancel => cmd::cmd_cancel(&project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
