//! Coherence issues, auto-fixes and report persistence.

use crate::plan::types::{ExecutionTableEntry, find_entry_mut, normalize_seq};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A mechanical fix that can be applied to the execution table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AutoFix {
    StripSelfDependency { seq: String },
}

impl fmt::Display for AutoFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutoFix::StripSelfDependency { seq } => {
                write!(f, "remove self-dependency from entry {}", seq)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoherenceIssue {
    pub severity: Severity,
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<AutoFix>,
}

impl CoherenceIssue {
    pub fn error(category: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            category: category.to_string(),
            message: message.into(),
            location: None,
            fix: None,
        }
    }

    pub fn warning(category: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(category, message)
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_fix(mut self, fix: AutoFix) -> Self {
        self.fix = Some(fix);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoherenceReport {
    pub generated_at: DateTime<Utc>,
    pub plan: PathBuf,
    /// Issues needing a human
    pub issues: Vec<CoherenceIssue>,
    /// Issues `check --fix` can resolve mechanically
    pub auto_fixes: Vec<CoherenceIssue>,
}

impl CoherenceReport {
    pub fn new(plan: &Path, all: Vec<CoherenceIssue>) -> Self {
        let (auto_fixes, issues): (Vec<_>, Vec<_>) = all.into_iter().partition(|i| i.fix.is_some());
        Self {
            generated_at: Utc::now(),
            plan: plan.to_path_buf(),
            issues,
            auto_fixes,
        }
    }

    pub fn all_issues(&self) -> impl Iterator<Item = &CoherenceIssue> {
        self.issues.iter().chain(self.auto_fixes.iter())
    }

    pub fn error_count(&self) -> usize {
        self.all_issues().filter(|i| i.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.all_issues().filter(|i| !i.is_error()).count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn fixes(&self) -> Vec<AutoFix> {
        self.auto_fixes.iter().filter_map(|i| i.fix.clone()).collect()
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str("# Coherence Report\n\n");
        out.push_str(&format!("- Plan: `{}`\n", self.plan.display()));
        out.push_str(&format!("- Generated: {}\n", self.generated_at.to_rfc3339()));
        out.push_str(&format!(
            "- Errors: {}, warnings: {}\n",
            self.error_count(),
            self.warning_count()
        ));

        let section = |title: &str, items: &[CoherenceIssue]| -> String {
            if items.is_empty() {
                return String::new();
            }
            let mut s = format!("\n## {}\n\n", title);
            for issue in items {
                s.push_str(&format!(
                    "- **{}** [{}] {}",
                    issue.severity, issue.category, issue.message
                ));
                if let Some(loc) = &issue.location {
                    s.push_str(&format!(" ({})", loc));
                }
                if let Some(fix) = &issue.fix {
                    s.push_str(&format!("; auto-fix: {}", fix));
                }
                s.push('\n');
            }
            s
        };
        out.push_str(&section("Issues", &self.issues));
        out.push_str(&section("Auto-fixable", &self.auto_fixes));
        out
    }

    /// Write `<name>.json` and `<name>.md` side by side.
    pub fn write(&self, json_path: &Path, markdown_path: &Path) -> Result<()> {
        crate::util::write_json_atomic(json_path, self)?;
        crate::util::write_atomic(markdown_path, self.to_markdown().as_bytes())?;
        Ok(())
    }
}

/// Apply fixes to table entries. Returns the number of entries changed.
pub fn apply_auto_fixes(entries: &mut [ExecutionTableEntry], fixes: &[AutoFix]) -> usize {
    let mut changed = 0;
    for fix in fixes {
        match fix {
            AutoFix::StripSelfDependency { seq } => {
                if let Some(entry) = find_entry_mut(entries, seq) {
                    let own = normalize_seq(&entry.seq);
                    let before = entry.dependencies.len();
                    entry.dependencies.retain(|d| normalize_seq(d) != own);
                    if entry.dependencies.len() != before {
                        changed += 1;
                    }
                }
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_report_partitions_auto_fixes() {
        let report = CoherenceReport::new(
            Path::new("plan.md"),
            vec![
                CoherenceIssue::error("dag", "Entry 01 depends on itself")
                    .with_fix(AutoFix::StripSelfDependency { seq: "01".into() }),
                CoherenceIssue::warning("duplicates", "similar criteria"),
            ],
        );
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.auto_fixes.len(), 1);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.fixes().len(), 1);
    }

    #[test]
    fn test_apply_strip_self_dependency() {
        let mut entries = vec![ExecutionTableEntry::new("01", "a.md", vec!["1".into(), "2".into()])];
        let changed = apply_auto_fixes(
            &mut entries,
            &[AutoFix::StripSelfDependency { seq: "1".into() }],
        );
        assert_eq!(changed, 1);
        assert_eq!(entries[0].dependencies, vec!["2"]);
    }

    #[test]
    fn test_write_json_and_markdown() {
        let dir = tempdir().unwrap();
        let report = CoherenceReport::new(
            Path::new("plan.md"),
            vec![CoherenceIssue::error("contracts", "02-api requires export:X").at("02-api")],
        );
        let json = dir.path().join("coherence-report.json");
        let md = dir.path().join("coherence-report.md");
        report.write(&json, &md).unwrap();

        let loaded: CoherenceReport =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(loaded.issues, report.issues);
        let markdown = std::fs::read_to_string(&md).unwrap();
        assert!(markdown.contains("**error** [contracts]"));
        assert!(markdown.contains("(02-api)"));
    }
}
