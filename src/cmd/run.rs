//! Plan execution: `cascade run`.

use anyhow::{Result, bail};
use std::path::PathBuf;
use std::sync::Arc;

use super::super::{Cli, RunArgs};

pub async fn cmd_run(cli: &Cli, project_dir: PathBuf, args: &RunArgs) -> Result<()> {
    use cascade::config::CascadeConfig;
    use cascade::orchestrator::{
        CommandExecutor, EventSink, Orchestrator, RunEvent, RunOptions,
    };
    use cascade::ui::RunUI;
    use tokio::sync::mpsc;

    let config = CascadeConfig::with_cli_args(project_dir, cli.verbose, cli.yes)?;
    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let executor = CommandExecutor::from_config(&config.toml)?.with_log_dir(config.log_dir());

    let mut options = RunOptions::from_config(&config);
    options.children_dir = args.children_dir.clone();
    options.resume = args.resume;
    if let Some(strategy) = args.strategy {
        options.strategy = strategy;
    }
    if args.parallel {
        options.parallel = true;
    }
    if let Some(max_parallel) = args.max_parallel {
        options.max_parallel = max_parallel;
    }
    if args.no_push {
        options.push = false;
    }
    if args.no_cleanup {
        options.cleanup = false;
    }

    let (event_tx, mut event_rx) = mpsc::channel::<RunEvent>(100);
    let orchestrator = Orchestrator::new(config, &args.plan, options, Arc::new(executor))?
        .with_events(EventSink::new(event_tx));

    let total = orchestrator.store().load_entries()?.len();
    let ui = RunUI::new(total, args.ui);
    let display_handle = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            ui.handle_event(&event);
        }
    });

    let result = orchestrator.run().await;
    // Dropping the orchestrator closes the channel so the display task ends.
    drop(orchestrator);
    display_handle.await.ok();

    let summary = result?;
    if summary.all_completed() {
        return Ok(());
    }
    match &summary.paused_reason {
        Some(reason) => bail!(
            "Run paused: {}. Fix the cause, then run `cascade run {} --resume`",
            reason,
            args.plan.display()
        ),
        None => bail!(
            "{} of {} entries did not complete",
            summary.total - summary.completed,
            summary.total
        ),
    }
}
