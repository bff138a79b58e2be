//! Session inspection and cancellation.

use anyhow::Result;
use cascade::config::CONFIG_DIR;
use cascade::orchestrator::RunSummary;
use cascade::plan::PlanStore;
use cascade::session::{SessionManager, SessionStatus};
use cascade::ui::render_summary;
use console::style;
use std::path::Path;

/// `cascade status`
pub fn cmd_status(project_dir: &Path) -> Result<()> {
    let sessions = SessionManager::new(project_dir.join(CONFIG_DIR));

    println!();
    println!("Cascade Session Status");
    println!("======================");
    println!();

    let Some(state) = sessions.load()? else {
        println!("No session found.");
        println!();
        println!("Run `cascade run <plan>` to start one.");
        println!();
        return Ok(());
    };

    let status = match state.status {
        SessionStatus::Completed => style(state.status.to_string()).green(),
        SessionStatus::Running => style(state.status.to_string()).cyan(),
        _ => style(state.status.to_string()).yellow(),
    };
    println!("Plan:     {}", state.parent_plan.display());
    println!("Status:   {}{}", status, if state.active { " (active)" } else { "" });
    println!("Session:  {}", state.session_id);
    println!("Owner:    pid {}", state.owner_pid);
    println!("Started:  {}", state.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(feature) = &state.feature_branch {
        println!("Branch:   {}", feature);
    }
    if let Some(child) = &state.current_child {
        println!("Running:  entry {}", child);
    }
    if let Some(pending) = &state.pending_merge {
        println!(
            "Pending:  merge of {} (entry {}) awaiting manual resolution",
            pending.branch, pending.seq
        );
    }
    if let Some(reason) = &state.reason {
        println!("Reason:   {}", reason);
    }

    match PlanStore::new(&state.parent_plan).load_entries() {
        Ok(entries) => {
            let mut summary =
                RunSummary::new(state.feature_branch.as_deref().unwrap_or_default());
            summary.tally(&entries);
            summary.paused_reason = (state.status == SessionStatus::Paused)
                .then(|| state.reason.clone())
                .flatten();
            println!("{}", render_summary(&summary));
        }
        Err(e) => println!("Plan unreadable: {:#}", e),
    }
    println!();
    Ok(())
}

/// `cascade cancel`
pub fn cmd_cancel(project_dir: &Path) -> Result<()> {
    let sessions = SessionManager::new(project_dir.join(CONFIG_DIR));
    match sessions.cancel()? {
        Some(state) if state.active => println!(
            "Cancellation requested; process {} stops after its current step.",
            state.owner_pid
        ),
        Some(_) => println!("Session marked cancelled; its owner is no longer running."),
        None => println!("No active session to cancel."),
    }
    Ok(())
}
