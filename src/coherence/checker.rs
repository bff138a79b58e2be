//! Pre-flight audits of a parent plan and its child documents.
//!
//! Five independent checks run over the parsed plan. A check that fails
//! internally is recorded as an `internal` error and the others still run.

use crate::coherence::report::{AutoFix, CoherenceIssue, CoherenceReport};
use crate::coherence::similarity::{coverage_ratio, jaccard, tokenize};
use crate::config::CoherenceSection;
use crate::dag::DagBuilder;
use crate::errors::DagError;
use crate::plan::PlanStore;
use crate::plan::parser::{parse_acceptance_criteria, parse_plan};
use crate::plan::types::{Criterion, ExecutionTableEntry, PlanDocument};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// A child plan document loaded from disk.
#[derive(Debug, Clone)]
pub struct ChildDocument {
    pub seq: String,
    /// Reference as written in the execution table
    pub reference: String,
    pub path: PathBuf,
    pub text: String,
    pub criteria: Vec<Criterion>,
}

impl ChildDocument {
    pub fn load(children_dir: &Path, entry: &ExecutionTableEntry) -> Result<Self> {
        let path = children_dir.join(&entry.path);
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read child plan {}", path.display()))?;
        Ok(Self::from_text(entry, path, text))
    }

    pub fn from_text(entry: &ExecutionTableEntry, path: PathBuf, text: String) -> Self {
        Self {
            seq: entry.seq.clone(),
            reference: entry.path.clone(),
            criteria: parse_acceptance_criteria(&text),
            path,
            text,
        }
    }
}

/// Load every child document; unreadable ones become error issues.
pub fn load_children(
    children_dir: &Path,
    entries: &[ExecutionTableEntry],
) -> (Vec<ChildDocument>, Vec<CoherenceIssue>) {
    let mut children = Vec::new();
    let mut issues = Vec::new();
    for entry in entries {
        match ChildDocument::load(children_dir, entry) {
            Ok(child) => children.push(child),
            Err(e) => issues.push(
                CoherenceIssue::error("documents", format!("{:#}", e)).at(entry.path.clone()),
            ),
        }
    }
    (children, issues)
}

struct Concern {
    name: &'static str,
    pattern: &'static str,
}

const CONCERNS: &[Concern] = &[
    Concern {
        name: "authentication",
        pattern: r"(?i)\b(auth|authentication|authenticate[ds]?|authorization|login|logout|jwt|oauth|sessions?)\b",
    },
    Concern {
        name: "logging/observability",
        pattern: r"(?i)\b(logging|logs?|observability|telemetry|metrics|tracing|monitoring)\b",
    },
    Concern {
        name: "error handling",
        pattern: r"(?i)\b(error handling|errors?|exceptions?|retry|retries|fallback)\b",
    },
    Concern {
        name: "test infrastructure",
        pattern: r"(?i)\b(tests?|testing|fixtures?|test infrastructure|coverage)\b",
    },
    Concern {
        name: "migrations",
        pattern: r"(?i)\b(migrations?|schema changes?|migrate)\b",
    },
];

static CONCERN_RES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    CONCERNS
        .iter()
        .filter_map(|c| Regex::new(c.pattern).ok().map(|re| (c.name, re)))
        .collect()
});

pub struct CoherenceChecker {
    settings: CoherenceSection,
}

impl CoherenceChecker {
    pub fn new(settings: CoherenceSection) -> Self {
        Self { settings }
    }

    /// Run every check and collect the issues into a report.
    pub fn check(
        &self,
        plan_path: &Path,
        plan_text: &str,
        plan: &PlanDocument,
        children: &[ChildDocument],
    ) -> CoherenceReport {
        let checks: [(&str, Box<dyn Fn() -> Result<Vec<CoherenceIssue>> + '_>); 5] = [
            ("coverage", Box::new(|| self.check_coverage(plan, children))),
            ("contracts", Box::new(|| self.check_contracts(plan))),
            ("duplicates", Box::new(|| self.check_duplicates(children))),
            (
                "cross-cutting",
                Box::new(|| self.check_cross_cutting(plan_text, children)),
            ),
            ("dag", Box::new(|| self.check_dag(&plan.entries))),
        ];

        let mut issues = Vec::new();
        for (name, check) in checks {
            match check() {
                Ok(found) => {
                    tracing::debug!(check = name, issues = found.len(), "Coherence check finished");
                    issues.extend(found);
                }
                Err(e) => issues.push(CoherenceIssue::error(
                    "internal",
                    format!("{} check failed: {:#}", name, e),
                )),
            }
        }
        CoherenceReport::new(plan_path, issues)
    }

    /// Read the plan and its children fresh from disk and check them.
    pub fn check_store(
        &self,
        store: &PlanStore,
        children_dir: &Path,
    ) -> Result<(PlanDocument, CoherenceReport)> {
        let text = store.read_text()?;
        let plan = parse_plan(&text);
        let (children, unreadable) = load_children(children_dir, &plan.entries);
        let mut report = self.check(store.plan_path(), &text, &plan, &children);
        report.issues.extend(unreadable);
        Ok((plan, report))
    }

    /// Every parent criterion must be covered by some child criterion.
    pub fn check_coverage(
        &self,
        plan: &PlanDocument,
        children: &[ChildDocument],
    ) -> Result<Vec<CoherenceIssue>> {
        let child_sets: Vec<HashSet<String>> = children
            .iter()
            .flat_map(|c| c.criteria.iter().map(|cr| tokenize(&cr.text)))
            .collect();

        let mut issues = Vec::new();
        for criterion in &plan.acceptance_criteria {
            let parent = tokenize(&criterion.text);
            let best = child_sets
                .iter()
                .map(|c| coverage_ratio(&parent, c))
                .fold(0.0_f64, f64::max);
            if parent.is_empty() || best >= self.settings.coverage_threshold {
                continue;
            }
            issues.push(
                CoherenceIssue::error(
                    "coverage",
                    format!(
                        "Parent criterion not covered by any child (best overlap {:.0}%): {}",
                        best * 100.0,
                        criterion.text
                    ),
                )
                .at(format!("line {}", criterion.line)),
            );
        }
        Ok(issues)
    }

    /// Required artifacts need a provider; provided artifacts should be used.
    pub fn check_contracts(&self, plan: &PlanDocument) -> Result<Vec<CoherenceIssue>> {
        let matrix = &plan.contracts;
        let mut issues = Vec::new();
        let mut reported: HashSet<(String, String)> = HashSet::new();

        for contract in &matrix.entries {
            if !plan.entries.iter().any(|e| contract.matches_entry(e)) {
                issues.push(
                    CoherenceIssue::warning(
                        "contracts",
                        format!(
                            "Contract row '{}' matches no execution table entry",
                            contract.child
                        ),
                    )
                    .at(contract.child.clone()),
                );
            }

            for required in &contract.requires {
                if required.optional || matrix.is_provided(required) {
                    continue;
                }
                let key = (contract.child.clone(), format!("{}:{}", required.kind, required.name));
                if !reported.insert(key) {
                    continue;
                }
                issues.push(
                    CoherenceIssue::error(
                        "contracts",
                        format!(
                            "{} requires {} but no child provides it",
                            contract.child, required
                        ),
                    )
                    .at(contract.child.clone()),
                );
            }
        }

        let mut unused: HashSet<String> = HashSet::new();
        for contract in &matrix.entries {
            for provided in &contract.provides {
                if !matrix.is_required(provided) && unused.insert(provided.to_string()) {
                    issues.push(
                        CoherenceIssue::warning(
                            "contracts",
                            format!(
                                "{} provides {} but nothing requires it",
                                contract.child, provided
                            ),
                        )
                        .at(contract.child.clone()),
                    );
                }
            }
        }
        Ok(issues)
    }

    /// Near-identical criteria in different children.
    pub fn check_duplicates(&self, children: &[ChildDocument]) -> Result<Vec<CoherenceIssue>> {
        let items: Vec<(&ChildDocument, &Criterion, HashSet<String>)> = children
            .iter()
            .flat_map(|c| c.criteria.iter().map(move |cr| (c, cr, tokenize(&cr.text))))
            .filter(|(_, _, tokens)| !tokens.is_empty())
            .collect();

        let mut issues = Vec::new();
        for (i, (child_a, crit_a, tokens_a)) in items.iter().enumerate() {
            for (child_b, crit_b, tokens_b) in items.iter().skip(i + 1) {
                if child_a.seq == child_b.seq {
                    continue;
                }
                let similarity = jaccard(tokens_a, tokens_b);
                if similarity > self.settings.duplicate_threshold {
                    issues.push(
                        CoherenceIssue::warning(
                            "duplicates",
                            format!(
                                "Possible duplicate work ({:.0}% similar): '{}' in {} and '{}' in {}",
                                similarity * 100.0,
                                crit_a.text,
                                child_a.reference,
                                crit_b.text,
                                child_b.reference
                            ),
                        )
                        .at(format!("{}, {}", child_a.reference, child_b.reference)),
                    );
                }
            }
        }
        Ok(issues)
    }

    /// Concerns the parent mentions that no child picks up.
    pub fn check_cross_cutting(
        &self,
        plan_text: &str,
        children: &[ChildDocument],
    ) -> Result<Vec<CoherenceIssue>> {
        let mut issues = Vec::new();
        for (name, re) in CONCERN_RES.iter() {
            if re.is_match(plan_text) && !children.iter().any(|c| re.is_match(&c.text)) {
                issues.push(CoherenceIssue::warning(
                    "cross-cutting",
                    format!(
                        "Parent plan mentions {} but no child plan addresses it",
                        name
                    ),
                ));
            }
        }
        Ok(issues)
    }

    /// Structural validity of the dependency graph.
    pub fn check_dag(&self, entries: &[ExecutionTableEntry]) -> Result<Vec<CoherenceIssue>> {
        let mut issues: Vec<CoherenceIssue> = DagBuilder::new(entries)
            .audit()
            .into_iter()
            .map(|err| {
                let issue = CoherenceIssue::error("dag", err.to_string());
                match err {
                    DagError::SelfDependency { seq } => issue
                        .at(format!("entry {}", seq))
                        .with_fix(AutoFix::StripSelfDependency { seq }),
                    DagError::UnknownDependency { seq, .. } | DagError::DuplicateSeq { seq } => {
                        issue.at(format!("entry {}", seq))
                    }
                    DagError::Cycle { .. } => issue,
                }
            })
            .collect();

        let position: HashMap<String, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.normalized_seq(), i))
            .collect();
        for (i, entry) in entries.iter().enumerate() {
            for dep in &entry.dependencies {
                if let Some(&dep_pos) = position.get(&crate::plan::normalize_seq(dep))
                    && dep_pos > i
                {
                    issues.push(
                        CoherenceIssue::warning(
                            "dag",
                            format!(
                                "Entry {} depends on {}, which comes later in the table",
                                entry.seq, dep
                            ),
                        )
                        .at(format!("entry {}", entry.seq)),
                    );
                }
            }
        }
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::parser::parse_plan;
    use crate::plan::types::{Artifact, ArtifactKind, ContractEntry, ContractMatrix};

    fn checker() -> CoherenceChecker {
        CoherenceChecker::new(CoherenceSection::default())
    }

    fn child(seq: &str, reference: &str, text: &str) -> ChildDocument {
        let entry = ExecutionTableEntry::new(seq, reference, vec![]);
        ChildDocument::from_text(&entry, PathBuf::from(reference), text.to_string())
    }

    #[test]
    fn test_contract_symmetry_single_error_naming_child() {
        let plan = PlanDocument {
            entries: vec![
                ExecutionTableEntry::new("1", "a.md", vec![]),
                ExecutionTableEntry::new("2", "b.md", vec!["1".into()]),
            ],
            contracts: ContractMatrix::new(vec![
                ContractEntry::new("a"),
                ContractEntry::new("b").with_requires(vec![
                    Artifact::new(ArtifactKind::File, "x"),
                    Artifact::new(ArtifactKind::File, "x"),
                ]),
            ]),
            ..Default::default()
        };
        let issues = checker().check_contracts(&plan).unwrap();
        let errors: Vec<_> = issues.iter().filter(|i| i.is_error()).collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.starts_with("b requires file:x"));
        assert_eq!(errors[0].location.as_deref(), Some("b"));
    }

    #[test]
    fn test_optional_requirement_and_unused_provide() {
        let plan = PlanDocument {
            entries: vec![ExecutionTableEntry::new("1", "a.md", vec![])],
            contracts: ContractMatrix::new(vec![
                ContractEntry::new("a")
                    .with_requires(vec![Artifact::new(ArtifactKind::Type, "T").optional()])
                    .with_provides(vec![Artifact::new(ArtifactKind::Export, "Unused")]),
            ]),
            ..Default::default()
        };
        let issues = checker().check_contracts(&plan).unwrap();
        assert!(issues.iter().all(|i| !i.is_error()));
        assert!(issues.iter().any(|i| i.message.contains("nothing requires")));
    }

    #[test]
    fn test_coverage_detects_uncovered_criterion() {
        let plan = parse_plan(
            "# Plan\n## Acceptance Criteria\n- [ ] Users can register with email and password\n- [ ] Admins can export monthly billing reports\n",
        );
        let children = vec![child(
            "1",
            "01-register.md",
            "## Acceptance Criteria\n- [ ] Register endpoint accepts email and password for users\n",
        )];
        let issues = checker().check_coverage(&plan, &children).unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("billing"));
        assert!(issues[0].is_error());
    }

    #[test]
    fn test_duplicates_across_children() {
        let children = vec![
            child("1", "01-a.md", "- [ ] Create user table migration with indexes\n"),
            child("2", "02-b.md", "- [ ] Create user table migration with indexes\n"),
            child("3", "03-c.md", "- [ ] Render login form\n"),
        ];
        let issues = checker().check_duplicates(&children).unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("01-a.md"));
    }

    #[test]
    fn test_cross_cutting_concern_missing_from_children() {
        let children = vec![child("1", "01-a.md", "Build the settings page.")];
        let issues = checker()
            .check_cross_cutting("All endpoints require authentication.", &children)
            .unwrap();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("authentication"));

        let children = vec![child("1", "01-a.md", "Add JWT login.")];
        let issues = checker()
            .check_cross_cutting("All endpoints require authentication.", &children)
            .unwrap();
        assert!(issues.is_empty());
    }

    #[test]
    fn test_dag_issues_and_auto_fix() {
        let entries = vec![
            ExecutionTableEntry::new("1", "a.md", vec!["1".into(), "3".into()]),
            ExecutionTableEntry::new("2", "b.md", vec!["9".into()]),
            ExecutionTableEntry::new("3", "c.md", vec![]),
        ];
        let issues = checker().check_dag(&entries).unwrap();
        let self_dep = issues.iter().find(|i| i.fix.is_some()).unwrap();
        assert_eq!(
            self_dep.fix,
            Some(AutoFix::StripSelfDependency { seq: "1".into() })
        );
        assert!(issues.iter().any(|i| i.is_error() && i.message.contains("unknown entry 9")));
        assert!(issues.iter().any(|i| !i.is_error() && i.message.contains("later")));
    }

    #[test]
    fn test_dag_cycle_is_error() {
        let entries = vec![
            ExecutionTableEntry::new("1", "a.md", vec!["2".into()]),
            ExecutionTableEntry::new("2", "b.md", vec!["1".into()]),
        ];
        let issues = checker().check_dag(&entries).unwrap();
        assert!(issues.iter().any(|i| i.is_error() && i.message.contains("Cycle detected")));
    }

    #[test]
    fn test_check_builds_report() {
        let text = "# Plan: Demo\n## Acceptance Criteria\n- [ ] Build widget service\n\n## Execution Table\n| Seq | Child | Status | Depends On | Started | Completed |\n|-|-|-|-|-|-|\n| 1 | 01-widget.md | pending | 1 | | |\n";
        let plan = parse_plan(text);
        let children = vec![child("1", "01-widget.md", "- [ ] Build the widget service\n")];
        let report = checker().check(Path::new("plan.md"), text, &plan, &children);
        assert_eq!(report.auto_fixes.len(), 1);
        assert!(report.has_errors());
        assert!(report.issues.iter().all(|i| i.category != "coverage"));
    }
}
