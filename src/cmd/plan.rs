//! Read-only plan inspection and pre-flight commands.

use anyhow::{Context, Result, bail};
use cascade::coherence::{CoherenceChecker, CoherenceIssue, CoherenceReport, apply_auto_fixes};
use cascade::config::CascadeConfig;
use cascade::contract::ContractVerifier;
use cascade::dag::{Selection, find_next_executable, group_waves};
use cascade::plan::{EntryStatus, PlanStore, find_entry};
use cascade::session::ensure_gitignore;
use cascade::ui::icons::{CHECK, CROSS, WARN};
use console::style;
use std::path::{Path, PathBuf};

fn children_dir_for(plan: &Path, children_dir: Option<&Path>) -> PathBuf {
    match children_dir {
        Some(dir) => dir.to_path_buf(),
        None => plan
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

fn load_store(plan: &Path) -> Result<PlanStore> {
    if !plan.is_file() {
        bail!("Plan not found: {}", plan.display());
    }
    Ok(PlanStore::new(plan))
}

fn print_issue(issue: &CoherenceIssue) {
    let icon = if issue.is_error() { &CROSS } else { &WARN };
    let location = issue
        .location
        .as_deref()
        .map(|l| format!(" ({})", l))
        .unwrap_or_default();
    println!(
        "  {}{} {}{}",
        icon,
        style(format!("[{}]", issue.category)).dim(),
        issue.message,
        style(location).dim()
    );
}

fn print_report(report: &CoherenceReport) {
    for issue in report.all_issues() {
        print_issue(issue);
    }
    println!();
    println!(
        "{} error(s), {} warning(s), {} auto-fixable",
        report.error_count(),
        report.warning_count(),
        report.auto_fixes.len()
    );
}

/// `cascade check <plan> [--fix]`
pub fn cmd_check(
    project_dir: &Path,
    plan: &Path,
    children_dir: Option<&Path>,
    fix: bool,
) -> Result<()> {
    let config = CascadeConfig::new(project_dir.to_path_buf())?;
    let store = load_store(plan)?;
    let children_dir = children_dir_for(plan, children_dir);
    let checker = CoherenceChecker::new(config.toml.coherence.clone());

    let (doc, mut report) = checker.check_store(&store, &children_dir)?;
    for warning in &doc.warnings {
        println!("  {}{}", WARN, warning);
    }

    let fixes = report.fixes();
    if fix && !fixes.is_empty() {
        let mut entries = doc.entries.clone();
        let changed = apply_auto_fixes(&mut entries, &fixes);
        store.save_entries(&entries)?;
        println!("{}Applied {} fix(es) to {}", CHECK, changed, plan.display());
        report = checker.check_store(&store, &children_dir)?.1;
    }

    println!();
    println!(
        "{}",
        style(format!("Coherence check: {}", plan.display())).bold()
    );
    print_report(&report);

    ensure_gitignore(&config.config_dir)?;
    report.write(&config.report_json(), &config.report_markdown())?;
    println!("Report written to {}", config.report_markdown().display());

    if report.has_errors() {
        if !fix && !report.auto_fixes.is_empty() {
            println!("Run with --fix to apply the auto-fixable issues.");
        }
        bail!("{} blocking issue(s) found", report.error_count());
    }
    Ok(())
}

/// `cascade next <plan>`
pub fn cmd_next(plan: &Path) -> Result<()> {
    let entries = load_store(plan)?.load_entries()?;
    match find_next_executable(&entries) {
        Selection::Ready(entry) => {
            println!("{} {}", style(&entry.seq).yellow().bold(), entry.path);
        }
        Selection::Exhausted => println!("{}No pending entries", CHECK),
        Selection::Blocked(reason) => println!("{}Blocked: {}", WARN, reason),
    }
    Ok(())
}

/// `cascade waves <plan>`
pub fn cmd_waves(plan: &Path) -> Result<()> {
    let entries = load_store(plan)?.load_entries()?;
    let waves = group_waves(&entries)?;
    println!();
    for (index, wave) in waves.iter().enumerate() {
        let members: Vec<String> = wave
            .iter()
            .map(|e| match e.status {
                EntryStatus::Completed => style(&e.seq).green().to_string(),
                EntryStatus::Pending => e.seq.clone(),
                _ => style(format!("{} ({})", e.seq, e.status)).yellow().to_string(),
            })
            .collect();
        println!(
            "{} {}",
            style(format!("Wave {}:", index + 1)).cyan().bold(),
            members.join(", ")
        );
    }
    println!();
    Ok(())
}

/// `cascade verify <plan> <seq> [--provides]`
pub fn cmd_verify(project_dir: &Path, plan: &Path, seq: &str, provides: bool) -> Result<()> {
    let config = CascadeConfig::new(project_dir.to_path_buf())?;
    let doc = load_store(plan)?.load()?;
    let entry = find_entry(&doc.entries, seq)
        .with_context(|| format!("Entry {} not found in {}", seq, plan.display()))?;

    let verifier = ContractVerifier::new(&config.project_dir, config.toml.verification.clone());
    let report = if provides {
        verifier.verify_provides(entry, &doc.contracts)
    } else {
        verifier.verify_prerequisites(entry, &doc.contracts)
    };

    for (artifact, location) in &report.satisfied {
        println!("  {}{} {}", CHECK, artifact, style(location).dim());
    }
    for missing in &report.missing {
        println!("  {}{}", CROSS, missing.reason);
    }
    for warning in &report.warnings {
        println!("  {}{}", WARN, warning);
    }

    if !report.is_satisfied() {
        bail!(
            "Entry {} is missing required artifact(s): {}",
            entry.seq,
            report.missing_summary()
        );
    }
    println!("{}Entry {} contract satisfied", CHECK, entry.seq);
    Ok(())
}
