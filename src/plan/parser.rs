//! Parser for parent and child plan documents.
//!
//! Plans are markdown documents with an execution table, a dependency contract
//! matrix and an acceptance-criteria checklist:
//!
//! ```markdown
//! # Plan: User Authentication
//!
//! ## Acceptance Criteria
//! - [ ] Users can register with email and password
//!
//! ## Execution Table
//! | Seq | Child | Status | Depends On | Started | Completed |
//! |-----|-------|--------|------------|---------|-----------|
//! | 01 | 01-user-model.md | pending | — | | |
//! | 02 | 02-auth-api.md | pending | 01 | | |
//!
//! ## Dependency Contract Matrix
//! | Child | Requires | Provides |
//! |-------|----------|----------|
//! | 01-user-model | — | export:UserModel |
//! | 02-auth-api | export:UserModel | endpoint:POST /api/login |
//! ```
//!
//! The documents are human-edited, so nothing here returns an error: malformed
//! rows are dropped with a `ParseWarning` and a missing table yields an empty
//! result plus a warning.

use crate::plan::path::validate_relative_path;
use crate::plan::types::{
    Artifact, ContractEntry, ContractMatrix, Criterion, EntryStatus, ExecutionTableEntry,
    ParseWarning, PlanDocument, is_empty_marker, normalize_seq,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*\s*$").expect("valid heading regex"));

static CHECKBOX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*+]\s+\[([ xX])\]\s*(.*\S)\s*$").expect("valid checkbox regex")
});

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[[^\]]*\]\(([^)]+)\)$").expect("valid link regex"));

const EXECUTION_SECTIONS: &[&str] = &["execution table", "execution order"];
const CONTRACT_SECTIONS: &[&str] = &[
    "dependency contract matrix",
    "contract matrix",
    "dependency contracts",
];
const CRITERIA_SECTIONS: &[&str] = &["acceptance criteria"];

const EXECUTION_HEADER: &[&str] = &["Seq", "Child", "Status", "Depends On", "Started", "Completed"];

#[derive(Debug, Clone)]
struct Heading {
    index: usize,
    level: usize,
    title: String,
}

#[derive(Debug, Clone)]
struct TableBlock {
    /// Index of the header line.
    start: usize,
    /// One past the last table line.
    end: usize,
    header: Vec<String>,
    /// (line index, cells) for each data row.
    rows: Vec<(usize, Vec<String>)>,
}

/// Line-level view of a document with code fences masked out.
struct Document<'a> {
    lines: Vec<&'a str>,
    in_fence: Vec<bool>,
    headings: Vec<Heading>,
}

impl<'a> Document<'a> {
    fn new(text: &'a str) -> Self {
        let lines: Vec<&str> = text.lines().collect();
        let mut in_fence = Vec::with_capacity(lines.len());
        let mut fenced = false;
        for line in &lines {
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence.push(true);
                fenced = !fenced;
            } else {
                in_fence.push(fenced);
            }
        }

        let headings = lines
            .iter()
            .enumerate()
            .filter(|(i, _)| !in_fence[*i])
            .filter_map(|(i, line)| {
                HEADING_RE.captures(line).map(|caps| Heading {
                    index: i,
                    level: caps[1].len(),
                    title: caps[2].trim().to_string(),
                })
            })
            .collect();

        Self {
            lines,
            in_fence,
            headings,
        }
    }

    /// Body range `[start, end)` of the first section whose heading matches.
    fn section(&self, names: &[&str]) -> Option<(usize, usize)> {
        let (pos, heading) = self.headings.iter().enumerate().find(|(_, h)| {
            let title = normalize_heading(&h.title);
            names.iter().any(|n| title == *n || title.ends_with(n))
        })?;

        let end = self.headings[pos + 1..]
            .iter()
            .find(|h| h.level <= heading.level)
            .map(|h| h.index)
            .unwrap_or(self.lines.len());

        Some((heading.index + 1, end))
    }

    fn tables_in(&self, start: usize, end: usize) -> Vec<TableBlock> {
        let mut tables = Vec::new();
        let mut i = start;
        while i < end {
            if self.in_fence[i] || !is_table_line(self.lines[i]) {
                i += 1;
                continue;
            }

            let table_start = i;
            while i < end && !self.in_fence[i] && is_table_line(self.lines[i]) {
                i += 1;
            }

            let header = split_row(self.lines[table_start]);
            let mut rows = Vec::new();
            for idx in table_start + 1..i {
                let cells = split_row(self.lines[idx]);
                if is_separator_row(&cells) {
                    continue;
                }
                rows.push((idx, cells));
            }
            tables.push(TableBlock {
                start: table_start,
                end: i,
                header,
                rows,
            });
        }
        tables
    }

    /// Locate a table by section heading, falling back to header recognition.
    fn locate_table(&self, sections: &[&str], header_words: &[&str]) -> Option<TableBlock> {
        if let Some((start, end)) = self.section(sections)
            && let Some(table) = self.tables_in(start, end).into_iter().next()
        {
            return Some(table);
        }

        self.tables_in(0, self.lines.len()).into_iter().find(|t| {
            let header: Vec<String> = t.header.iter().map(|c| normalize_header(c)).collect();
            header_words
                .iter()
                .all(|w| header.iter().any(|h| h.contains(w)))
        })
    }
}

fn normalize_heading(title: &str) -> String {
    title
        .trim()
        .trim_end_matches(':')
        .to_lowercase()
        .replace(['_', '-'], " ")
}

fn normalize_header(cell: &str) -> String {
    cell.trim()
        .trim_matches('*')
        .to_lowercase()
        .replace('_', " ")
        .trim()
        .to_string()
}

fn is_table_line(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

fn split_row(line: &str) -> Vec<String> {
    let trimmed = line.trim();
    let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty()
        && cells.iter().all(|c| {
            let c = c.trim();
            !c.is_empty() && c.chars().all(|ch| matches!(ch, '-' | ':' | ' '))
        })
}

/// Index of the first header cell matching one of `aliases`, else `fallback`.
fn column_index(header: &[String], aliases: &[&str], fallback: usize) -> usize {
    header
        .iter()
        .position(|h| {
            let h = normalize_header(h);
            aliases.contains(&h.as_str())
        })
        .unwrap_or(fallback)
}

fn cell<'c>(cells: &'c [String], index: usize) -> &'c str {
    cells.get(index).map(|s| s.as_str()).unwrap_or("")
}

fn optional_cell(value: &str) -> Option<String> {
    if is_empty_marker(value) {
        None
    } else {
        Some(value.to_string())
    }
}

/// Strip backticks and unwrap `[label](target)` links.
fn unwrap_reference(value: &str) -> String {
    let trimmed = value.trim().trim_matches('`').trim();
    match LINK_RE.captures(trimmed) {
        Some(caps) => caps[1].trim().to_string(),
        None => trimmed.to_string(),
    }
}

/// Parse a dependency cell. All "no dependency" markers yield an empty list.
pub fn parse_dependency_cell(value: &str) -> Vec<String> {
    if is_empty_marker(value) {
        return Vec::new();
    }
    value
        .split([',', ';', ' '])
        .map(|d| d.trim().trim_start_matches('#').trim_matches('`'))
        .filter(|d| !is_empty_marker(d))
        .map(str::to_string)
        .collect()
}

/// Parse every section of a plan document.
pub fn parse_plan(text: &str) -> PlanDocument {
    let (entries, mut warnings) = parse_execution_table(text);
    let (contracts, contract_warnings) = parse_contract_matrix(text);
    warnings.extend(contract_warnings);

    PlanDocument {
        title: parse_title(text),
        acceptance_criteria: parse_acceptance_criteria(text),
        entries,
        contracts,
        warnings,
    }
}

/// First level-one heading, without a leading "Plan:" label.
pub fn parse_title(text: &str) -> Option<String> {
    let doc = Document::new(text);
    let heading = doc.headings.iter().find(|h| h.level == 1)?;
    let title = heading.title.trim();
    let lower = title.to_lowercase();
    let stripped = ["parent plan:", "plan:"]
        .iter()
        .find(|p| lower.starts_with(**p))
        .and_then(|p| title.get(p.len()..))
        .map(str::trim)
        .unwrap_or(title);
    if stripped.is_empty() {
        None
    } else {
        Some(stripped.to_string())
    }
}

/// Extract the execution table.
pub fn parse_execution_table(text: &str) -> (Vec<ExecutionTableEntry>, Vec<ParseWarning>) {
    let doc = Document::new(text);
    let mut warnings = Vec::new();

    let Some(table) = doc.locate_table(EXECUTION_SECTIONS, &["seq", "status"]) else {
        warnings.push(ParseWarning::new(0, "no execution table found"));
        return (Vec::new(), warnings);
    };

    let header = &table.header;
    let seq_col = column_index(header, &["seq", "#", "sequence", "order", "no", "no."], 0);
    let child_col = column_index(header, &["child", "plan", "path", "child plan", "file"], 1);
    let status_col = column_index(header, &["status", "state"], 2);
    let deps_col = column_index(
        header,
        &["depends on", "dependencies", "deps", "depends", "blocked by"],
        3,
    );
    let started_col = column_index(header, &["started", "started at", "start"], 4);
    let completed_col = column_index(
        header,
        &["completed", "completed at", "finished", "done at"],
        5,
    );

    let mut seen: HashSet<String> = HashSet::new();
    let mut entries = Vec::new();

    for (idx, cells) in &table.rows {
        let line = idx + 1;
        let seq = cell(cells, seq_col).trim_matches('`').trim().to_string();
        if seq.is_empty() {
            warnings.push(ParseWarning::new(line, "row has no sequence value; ignored"));
            continue;
        }

        let path = unwrap_reference(cell(cells, child_col));
        if let Err(reason) = validate_relative_path(&path) {
            warnings.push(ParseWarning::new(
                line,
                format!("entry {} dropped: child path '{}' rejected: {}", seq, path, reason),
            ));
            continue;
        }

        if !seen.insert(normalize_seq(&seq)) {
            warnings.push(ParseWarning::new(
                line,
                format!("duplicate sequence {}; row ignored", seq),
            ));
            continue;
        }

        let status = EntryStatus::parse(cell(cells, status_col));
        if let EntryStatus::Unknown(raw) = &status {
            warnings.push(ParseWarning::new(
                line,
                format!("entry {} has unrecognized status '{}'", seq, raw),
            ));
        }

        entries.push(ExecutionTableEntry {
            seq,
            path,
            status,
            dependencies: parse_dependency_cell(cell(cells, deps_col)),
            started: optional_cell(cell(cells, started_col)),
            completed: optional_cell(cell(cells, completed_col)),
        });
    }

    (entries, warnings)
}

/// Extract the requires/provides contract matrix.
pub fn parse_contract_matrix(text: &str) -> (ContractMatrix, Vec<ParseWarning>) {
    let doc = Document::new(text);
    let mut warnings = Vec::new();

    let Some(table) = doc.locate_table(CONTRACT_SECTIONS, &["requires", "provides"]) else {
        warnings.push(ParseWarning::new(0, "no dependency contract matrix found"));
        return (ContractMatrix::default(), warnings);
    };

    let header = &table.header;
    let child_col = column_index(header, &["child", "plan", "child plan"], 0);
    let requires_col = column_index(header, &["requires", "needs", "inputs"], 1);
    let provides_col = column_index(header, &["provides", "produces", "outputs"], 2);

    let mut seen: HashSet<String> = HashSet::new();
    let mut entries = Vec::new();

    for (idx, cells) in &table.rows {
        let line = idx + 1;
        let child = unwrap_reference(cell(cells, child_col));
        if child.is_empty() {
            warnings.push(ParseWarning::new(line, "contract row has no child; ignored"));
            continue;
        }
        if !seen.insert(child.clone()) {
            warnings.push(ParseWarning::new(
                line,
                format!("duplicate contract row for '{}'; first row wins", child),
            ));
            continue;
        }

        let requires = parse_artifact_cell(cell(cells, requires_col), line, &mut warnings);
        let provides = parse_artifact_cell(cell(cells, provides_col), line, &mut warnings);
        entries.push(ContractEntry {
            child,
            requires,
            provides,
        });
    }

    (ContractMatrix::new(entries), warnings)
}

fn parse_artifact_cell(value: &str, line: usize, warnings: &mut Vec<ParseWarning>) -> Vec<Artifact> {
    if is_empty_marker(value) {
        return Vec::new();
    }
    value
        .split(',')
        .filter_map(Artifact::parse)
        .map(|parsed| {
            if let Some(w) = parsed.warning {
                warnings.push(ParseWarning::new(line, w));
            }
            parsed.artifact
        })
        .collect()
}

/// Checkbox items of the "Acceptance Criteria" section.
///
/// Documents without that section contribute every checkbox item outside
/// code fences.
pub fn parse_acceptance_criteria(text: &str) -> Vec<Criterion> {
    let doc = Document::new(text);
    let (start, end) = doc.section(CRITERIA_SECTIONS).unwrap_or((0, doc.lines.len()));

    (start..end)
        .filter(|i| !doc.in_fence[*i])
        .filter_map(|i| {
            CHECKBOX_RE.captures(doc.lines[i]).map(|caps| Criterion {
                checked: &caps[1] != " ",
                text: caps[2].trim().to_string(),
                line: i + 1,
            })
        })
        .collect()
}

/// Render entries as the canonical execution table.
pub fn render_execution_table(entries: &[ExecutionTableEntry]) -> String {
    let mut out = String::new();
    out.push_str(&format!("| {} |\n", EXECUTION_HEADER.join(" | ")));
    out.push_str(&format!(
        "|{}|\n",
        EXECUTION_HEADER
            .iter()
            .map(|h| "-".repeat(h.len() + 2))
            .collect::<Vec<_>>()
            .join("|")
    ));

    for entry in entries {
        let deps = if entry.dependencies.is_empty() {
            "—".to_string()
        } else {
            entry.dependencies.join(", ")
        };
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            entry.seq,
            entry.path,
            entry.status,
            deps,
            entry.started.as_deref().unwrap_or(""),
            entry.completed.as_deref().unwrap_or(""),
        ));
    }
    out
}

/// Rewrite the execution table inside `text`, leaving everything else intact.
///
/// If the document has no execution table, a new section is appended.
pub fn replace_execution_table(text: &str, entries: &[ExecutionTableEntry]) -> String {
    let doc = Document::new(text);
    let rendered = render_execution_table(entries);
    let trailing_newline = text.ends_with('\n');

    let Some(table) = doc.locate_table(EXECUTION_SECTIONS, &["seq", "status"]) else {
        let mut out = text.to_string();
        if !out.is_empty() && !trailing_newline {
            out.push('\n');
        }
        out.push_str("\n## Execution Table\n\n");
        out.push_str(&rendered);
        return out;
    };

    let mut out: Vec<String> = doc.lines[..table.start].iter().map(|l| l.to_string()).collect();
    out.extend(rendered.lines().map(str::to_string));
    out.extend(doc.lines[table.end..].iter().map(|l| l.to_string()));

    let mut joined = out.join("\n");
    if trailing_newline {
        joined.push('\n');
    }
    joined
}

/// Append unchecked tasks to the acceptance-criteria section.
///
/// Creates the section when absent and skips tasks whose text is already
/// present. Returns the new text and the number of tasks added.
pub fn append_acceptance_tasks(text: &str, tasks: &[String]) -> (String, usize) {
    let existing: HashSet<String> = parse_acceptance_criteria(text)
        .into_iter()
        .map(|c| c.text)
        .collect();
    let new_tasks: Vec<&String> = tasks
        .iter()
        .filter(|t| !existing.contains(t.trim()))
        .collect();
    if new_tasks.is_empty() {
        return (text.to_string(), 0);
    }
    let task_lines: Vec<String> = new_tasks.iter().map(|t| format!("- [ ] {}", t.trim())).collect();

    let doc = Document::new(text);
    let trailing_newline = text.ends_with('\n') || text.is_empty();

    let Some((start, end)) = doc.section(CRITERIA_SECTIONS) else {
        let mut out = text.to_string();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str("\n## Acceptance Criteria\n\n");
        for line in &task_lines {
            out.push_str(line);
            out.push('\n');
        }
        return (out, new_tasks.len());
    };

    // After the last non-blank line of the section body.
    let insert_at = (start..end)
        .rev()
        .find(|i| !doc.lines[*i].trim().is_empty())
        .map(|i| i + 1)
        .unwrap_or(start);

    let mut out: Vec<String> = doc.lines[..insert_at].iter().map(|l| l.to_string()).collect();
    if insert_at == start {
        out.push(String::new());
    }
    out.extend(task_lines);
    out.extend(doc.lines[insert_at..].iter().map(|l| l.to_string()));

    let mut joined = out.join("\n");
    if trailing_newline {
        joined.push('\n');
    }
    (joined, new_tasks.len())
}
