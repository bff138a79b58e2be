//! Operator decisions at merge-conflict gates.

use crate::config::ConflictPolicy;
use anyhow::Result;
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};

/// The four ways a merge conflict can be settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Leave the conflict in the working tree for manual resolution.
    Pause,
    /// Resolve every conflicted file with the child branch's version.
    AcceptIncoming,
    /// Resolve every conflicted file with the target branch's version.
    AcceptExisting,
    /// `git merge --abort`; the child is marked failed.
    Abort,
}

impl ConflictDecision {
    pub const ALL: [ConflictDecision; 4] = [
        ConflictDecision::Pause,
        ConflictDecision::AcceptIncoming,
        ConflictDecision::AcceptExisting,
        ConflictDecision::Abort,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ConflictDecision::Pause => "Pause and resolve manually",
            ConflictDecision::AcceptIncoming => "Accept incoming (child branch wins)",
            ConflictDecision::AcceptExisting => "Accept existing (feature branch wins)",
            ConflictDecision::Abort => "Abort this merge",
        }
    }
}

/// What the operator is being asked about.
#[derive(Debug, Clone)]
pub struct ConflictContext<'a> {
    pub seq: &'a str,
    pub branch: &'a str,
    pub target: &'a str,
    pub files: &'a [String],
}

/// Source of operator decisions.
pub trait OperatorPrompt: Send + Sync {
    fn resolve_conflict(&self, ctx: &ConflictContext<'_>) -> Result<ConflictDecision>;
}

/// Interactive terminal prompt.
pub struct DialoguerPrompt;

impl OperatorPrompt for DialoguerPrompt {
    fn resolve_conflict(&self, ctx: &ConflictContext<'_>) -> Result<ConflictDecision> {
        println!();
        println!(
            "  {} merging {} into {} (entry {})",
            style("Conflict").red().bold(),
            style(ctx.branch).cyan(),
            style(ctx.target).cyan(),
            ctx.seq
        );
        for file in ctx.files {
            println!("    {}", style(file).yellow());
        }

        let labels: Vec<&str> = ConflictDecision::ALL.iter().map(|d| d.label()).collect();
        let selection = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("How should this conflict be resolved?")
            .items(&labels)
            .default(0)
            .interact()?;

        Ok(ConflictDecision::ALL
            .get(selection)
            .copied()
            .unwrap_or(ConflictDecision::Pause))
    }
}

/// Always returns the same decision. Used for unattended runs.
pub struct FixedPrompt(pub ConflictDecision);

impl OperatorPrompt for FixedPrompt {
    fn resolve_conflict(&self, ctx: &ConflictContext<'_>) -> Result<ConflictDecision> {
        tracing::info!(
            seq = ctx.seq,
            branch = ctx.branch,
            decision = ?self.0,
            "Conflict resolved without prompting"
        );
        Ok(self.0)
    }
}

/// Pick the prompt for the configured policy.
///
/// Unattended sessions and the `pause` policy never prompt.
pub fn prompt_for(policy: ConflictPolicy) -> Box<dyn OperatorPrompt> {
    match policy {
        ConflictPolicy::Prompt if console::user_attended() => Box::new(DialoguerPrompt),
        _ => Box::new(FixedPrompt(ConflictDecision::Pause)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_four_choices() {
        assert_eq!(ConflictDecision::ALL.len(), 4);
        let labels: std::collections::HashSet<_> =
            ConflictDecision::ALL.iter().map(|d| d.label()).collect();
        assert_eq!(labels.len(), 4);
    }

    #[test]
    fn test_fixed_prompt_returns_decision() {
        let prompt = FixedPrompt(ConflictDecision::AcceptExisting);
        let files = vec!["src/lib.rs".to_string()];
        let ctx = ConflictContext {
            seq: "02",
            branch: "feat/x--02-api",
            target: "feat/x",
            files: &files,
        };
        assert_eq!(
            prompt.resolve_conflict(&ctx).unwrap(),
            ConflictDecision::AcceptExisting
        );
    }

    #[test]
    fn test_pause_policy_never_prompts() {
        let prompt = prompt_for(ConflictPolicy::Pause);
        let ctx = ConflictContext {
            seq: "1",
            branch: "b",
            target: "t",
            files: &[],
        };
        assert_eq!(prompt.resolve_conflict(&ctx).unwrap(), ConflictDecision::Pause);
    }
}
