//! Core types for parsed plan documents.
//!
//! These types represent the execution table, the dependency contract matrix
//! and the typed artifacts that flow between child plans.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Normalize a sequence value for comparison.
///
/// Leading zeros are stripped so `"01"` and `"1"` compare equal, while `"1"`
/// and `"10"` stay distinct. An all-zero value normalizes to `"0"`.
pub fn normalize_seq(seq: &str) -> String {
    let trimmed = seq.trim();
    let stripped = trimmed.trim_start_matches('0');
    if stripped.is_empty() && !trimmed.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

/// Compare two sequence values after normalization.
pub fn seq_eq(a: &str, b: &str) -> bool {
    normalize_seq(a) == normalize_seq(b)
}

/// Status of a single execution table entry.
///
/// Serialized as its plain table text (`pending`, `in_progress`, ...).
/// Unrecognized cell text is kept verbatim in `Unknown` so a rewrite of the
/// table never loses what the operator typed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    /// Ran, but post-verification found promised artifacts missing.
    Partial,
    Failed,
    Skipped,
    Unknown(String),
}

impl EntryStatus {
    /// Parse a status cell. Never fails; unknown text becomes `Unknown`.
    pub fn parse(cell: &str) -> Self {
        let normalized: String = cell
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();

        match normalized.as_str() {
            "" | "pending" | "todo" | "not_started" => Self::Pending,
            "in_progress" | "running" | "wip" | "started" => Self::InProgress,
            "completed" | "complete" | "done" => Self::Completed,
            "partial" => Self::Partial,
            "failed" | "failure" | "error" => Self::Failed,
            "skipped" | "skip" => Self::Skipped,
            _ => Self::Unknown(cell.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Unknown(raw) => raw,
        }
    }

    /// Only `Completed` unblocks dependents. `Partial` explicitly does not.
    pub fn unblocks_dependents(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if the entry is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Partial | Self::Failed | Self::Skipped
        )
    }

    /// A terminal state that will never unblock dependents without intervention.
    pub fn is_blocking_failure(&self) -> bool {
        matches!(
            self,
            Self::Partial | Self::Failed | Self::Skipped | Self::Unknown(_)
        )
    }

    /// Allowed transitions of the per-entry state machine.
    ///
    /// Forward: `pending -> in_progress -> {completed|partial|failed|skipped}`
    /// and `pending -> skipped`. Back to `pending`: resolution resets of
    /// finished entries and crash recovery of `in_progress` entries.
    pub fn can_transition_to(&self, next: &EntryStatus) -> bool {
        use EntryStatus::*;
        match (self, next) {
            (Pending, InProgress) | (Pending, Skipped) => true,
            (InProgress, Completed | Partial | Failed | Skipped) => true,
            (InProgress, Pending) => true,
            (Completed | Partial | Failed, Pending) => true,
            (Unknown(_), Pending) => true,
            _ => false,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for EntryStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<EntryStatus> for String {
    fn from(value: EntryStatus) -> Self {
        value.as_str().to_string()
    }
}

/// One row of the execution table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTableEntry {
    /// Sequence value as written in the document (e.g. "01").
    pub seq: String,
    /// Child plan reference, relative to the children directory.
    pub path: String,
    pub status: EntryStatus,
    /// Sequence values this entry depends on, as written.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub started: Option<String>,
    #[serde(default)]
    pub completed: Option<String>,
}

impl ExecutionTableEntry {
    pub fn new(seq: &str, path: &str, dependencies: Vec<String>) -> Self {
        Self {
            seq: seq.to_string(),
            path: path.to_string(),
            status: EntryStatus::Pending,
            dependencies,
            started: None,
            completed: None,
        }
    }

    pub fn with_status(mut self, status: EntryStatus) -> Self {
        self.status = status;
        self
    }

    pub fn normalized_seq(&self) -> String {
        normalize_seq(&self.seq)
    }

    /// Identifier derived from the child path: its file stem.
    pub fn child_id(&self) -> String {
        child_stem(&self.path)
    }

    pub fn depends_on(&self, seq: &str) -> bool {
        let target = normalize_seq(seq);
        self.dependencies
            .iter()
            .any(|d| normalize_seq(d) == target)
    }

    pub fn mark_started(&mut self, at: &str) {
        self.status = EntryStatus::InProgress;
        self.started = Some(at.to_string());
        self.completed = None;
    }

    pub fn mark_finished(&mut self, status: EntryStatus, at: &str) {
        self.status = status;
        self.completed = Some(at.to_string());
    }

    /// Reset to `pending`, clearing both timestamps.
    pub fn reset(&mut self) {
        self.status = EntryStatus::Pending;
        self.started = None;
        self.completed = None;
    }
}

/// File stem of a child reference (`children/01-model.md` -> `01-model`).
pub fn child_stem(reference: &str) -> String {
    let trimmed = reference.trim().trim_matches('`');
    Path::new(trimmed)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Find an entry by sequence value, comparing normalized forms.
pub fn find_entry<'a>(
    entries: &'a [ExecutionTableEntry],
    seq: &str,
) -> Option<&'a ExecutionTableEntry> {
    let target = normalize_seq(seq);
    entries.iter().find(|e| e.normalized_seq() == target)
}

/// Mutable lookup by normalized sequence value.
pub fn find_entry_mut<'a>(
    entries: &'a mut [ExecutionTableEntry],
    seq: &str,
) -> Option<&'a mut ExecutionTableEntry> {
    let target = normalize_seq(seq);
    entries.iter_mut().find(|e| e.normalized_seq() == target)
}

/// Kind of artifact a contract refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    File,
    Export,
    Type,
    Endpoint,
    Migration,
    /// Only produced when deserializing machine-written records with a kind
    /// this build does not know. The document parser never emits it.
    #[serde(other)]
    Unknown,
}

impl ArtifactKind {
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.trim().to_lowercase().as_str() {
            "file" => Some(Self::File),
            "export" => Some(Self::Export),
            "type" => Some(Self::Type),
            "endpoint" => Some(Self::Endpoint),
            "migration" => Some(Self::Migration),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Export => "export",
            Self::Type => "type",
            Self::Endpoint => "endpoint",
            Self::Migration => "migration",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed, named deliverable. Identity is `(kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub name: String,
    /// Informative only; a missing optional artifact never blocks.
    #[serde(default)]
    pub optional: bool,
}

/// Suffixes that mark an artifact reference as optional.
const OPTIONAL_MARKERS: &[&str] = &["(optional)", "(informational)", "(info)", "?"];

/// Result of parsing a single `type:name` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArtifact {
    pub artifact: Artifact,
    /// Set when the type prefix was missing or unrecognized.
    pub warning: Option<String>,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Same `(kind, name)` pair, ignoring the optional flag.
    pub fn same_identity(&self, other: &Artifact) -> bool {
        self.kind == other.kind && self.name == other.name
    }

    /// Parse a `type:name` reference with an optional trailing marker.
    ///
    /// Unknown or missing prefixes fall back to `file` with a warning so a
    /// requirement is never silently dropped. Returns `None` only for empty
    /// text or a "no artifact" marker.
    pub fn parse(raw: &str) -> Option<ParsedArtifact> {
        let mut text = raw.trim().trim_matches('`').trim();
        if is_empty_marker(text) {
            return None;
        }

        let mut optional = false;
        loop {
            let lower = text.to_lowercase();
            let Some(marker) = OPTIONAL_MARKERS.iter().find(|m| lower.ends_with(**m)) else {
                break;
            };
            optional = true;
            text = text[..text.len() - marker.len()].trim_end();
        }
        if text.is_empty() {
            return None;
        }

        let (kind, name, warning) = match text.split_once(':') {
            Some((prefix, rest)) => match ArtifactKind::from_prefix(prefix) {
                Some(kind) => (kind, rest.trim(), None),
                None => (
                    ArtifactKind::File,
                    rest.trim(),
                    Some(format!(
                        "unrecognized artifact type '{}' in '{}'; treating as file",
                        prefix.trim(),
                        raw.trim()
                    )),
                ),
            },
            None => (
                ArtifactKind::File,
                text,
                Some(format!(
                    "artifact '{}' has no type prefix; treating as file",
                    raw.trim()
                )),
            ),
        };

        if name.is_empty() {
            return None;
        }

        Some(ParsedArtifact {
            artifact: Artifact {
                kind,
                name: name.to_string(),
                optional,
            },
            warning,
        })
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)?;
        if self.optional {
            f.write_str("?")?;
        }
        Ok(())
    }
}

/// Cell values meaning "nothing here".
pub fn is_empty_marker(cell: &str) -> bool {
    matches!(
        cell.trim().to_lowercase().as_str(),
        "" | "—" | "–" | "-" | "none" | "n/a"
    )
}

/// Contract row: what a child needs and what it promises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractEntry {
    pub child: String,
    #[serde(default)]
    pub requires: Vec<Artifact>,
    #[serde(default)]
    pub provides: Vec<Artifact>,
}

impl ContractEntry {
    pub fn new(child: &str) -> Self {
        Self {
            child: child.to_string(),
            requires: Vec::new(),
            provides: Vec::new(),
        }
    }

    pub fn with_requires(mut self, requires: Vec<Artifact>) -> Self {
        self.requires = requires;
        self
    }

    pub fn with_provides(mut self, provides: Vec<Artifact>) -> Self {
        self.provides = provides;
        self
    }

    /// Check whether this contract row belongs to the given entry.
    ///
    /// The child cell may name the entry by path, file name, file stem or seq.
    pub fn matches_entry(&self, entry: &ExecutionTableEntry) -> bool {
        let child = self.child.trim().trim_matches('`');
        if child.is_empty() {
            return false;
        }
        if child == entry.path {
            return true;
        }
        if child_stem(child) == entry.child_id() {
            return true;
        }
        child.chars().all(|c| c.is_ascii_digit()) && seq_eq(child, &entry.seq)
    }

    pub fn provides_artifact(&self, artifact: &Artifact) -> bool {
        self.provides.iter().any(|p| p.same_identity(artifact))
    }
}

/// The full dependency contract matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractMatrix {
    pub entries: Vec<ContractEntry>,
}

impl ContractMatrix {
    pub fn new(entries: Vec<ContractEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve the contract for an execution table entry.
    pub fn for_entry(&self, entry: &ExecutionTableEntry) -> Option<&ContractEntry> {
        self.entries.iter().find(|c| c.matches_entry(entry))
    }

    /// Every contract row that provides the given artifact.
    pub fn providers_of(&self, artifact: &Artifact) -> Vec<&ContractEntry> {
        self.entries
            .iter()
            .filter(|c| c.provides_artifact(artifact))
            .collect()
    }

    pub fn is_provided(&self, artifact: &Artifact) -> bool {
        self.entries.iter().any(|c| c.provides_artifact(artifact))
    }

    pub fn is_required(&self, artifact: &Artifact) -> bool {
        self.entries
            .iter()
            .any(|c| c.requires.iter().any(|r| r.same_identity(artifact)))
    }
}

/// A checkbox item from an acceptance-criteria section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub text: String,
    pub checked: bool,
    /// 1-based line number in the source document.
    pub line: usize,
}

/// A non-fatal problem found while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    /// 1-based line number, 0 when the warning is not tied to a line.
    pub line: usize,
    pub message: String,
}

impl ParseWarning {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "line {}: {}", self.line, self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

/// Everything extracted from one plan document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanDocument {
    pub title: Option<String>,
    pub acceptance_criteria: Vec<Criterion>,
    pub entries: Vec<ExecutionTableEntry>,
    pub contracts: ContractMatrix,
    pub warnings: Vec<ParseWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_seq_strips_leading_zeros_only() {
        assert_eq!(normalize_seq("01"), "1");
        assert_eq!(normalize_seq("1"), "1");
        assert_eq!(normalize_seq("10"), "10");
        assert_eq!(normalize_seq("010"), "10");
        assert_eq!(normalize_seq("00"), "0");
        assert_eq!(normalize_seq(" 3 "), "3");
    }

    #[test]
    fn seq_collision_safety() {
        assert!(seq_eq("01", "1"));
        assert!(!seq_eq("1", "10"));
        assert!(!seq_eq("01", "10"));

        let entries = vec![
            ExecutionTableEntry::new("1", "a.md", vec![]),
            ExecutionTableEntry::new("10", "b.md", vec![]),
        ];
        assert_eq!(find_entry(&entries, "01").unwrap().path, "a.md");
        assert_eq!(find_entry(&entries, "10").unwrap().path, "b.md");
        assert!(find_entry(&entries, "100").is_none());
    }

    #[test]
    fn depends_on_uses_normalized_seq() {
        let entry = ExecutionTableEntry::new("3", "c.md", vec!["01".into()]);
        assert!(entry.depends_on("1"));
        assert!(!entry.depends_on("10"));
    }

    #[test]
    fn status_parse_known_and_unknown() {
        assert_eq!(EntryStatus::parse("pending"), EntryStatus::Pending);
        assert_eq!(EntryStatus::parse(" In Progress "), EntryStatus::InProgress);
        assert_eq!(EntryStatus::parse("in-progress"), EntryStatus::InProgress);
        assert_eq!(EntryStatus::parse("✅ completed"), EntryStatus::Completed);
        assert_eq!(EntryStatus::parse("PARTIAL"), EntryStatus::Partial);
        assert_eq!(
            EntryStatus::parse("blocked-on-review"),
            EntryStatus::Unknown("blocked-on-review".into())
        );
    }

    #[test]
    fn only_completed_unblocks() {
        assert!(EntryStatus::Completed.unblocks_dependents());
        assert!(!EntryStatus::Partial.unblocks_dependents());
        assert!(!EntryStatus::Skipped.unblocks_dependents());
        assert!(!EntryStatus::Unknown("done?".into()).unblocks_dependents());
    }

    #[test]
    fn status_transitions() {
        use EntryStatus::*;
        assert!(Pending.can_transition_to(&InProgress));
        assert!(InProgress.can_transition_to(&Partial));
        assert!(Completed.can_transition_to(&Pending));
        assert!(!Pending.can_transition_to(&Completed));
        assert!(!Skipped.can_transition_to(&InProgress));
    }

    #[test]
    fn status_serializes_as_plain_string() {
        let json = serde_json::to_string(&EntryStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let back: EntryStatus = serde_json::from_str("\"partial\"").unwrap();
        assert_eq!(back, EntryStatus::Partial);
    }

    #[test]
    fn artifact_parse_typed_reference() {
        let parsed = Artifact::parse("export:UserModel").unwrap();
        assert_eq!(parsed.artifact, Artifact::new(ArtifactKind::Export, "UserModel"));
        assert!(parsed.warning.is_none());
    }

    #[test]
    fn artifact_parse_optional_markers() {
        let a = Artifact::parse("type:Session?").unwrap().artifact;
        assert!(a.optional);
        assert_eq!(a.name, "Session");

        let b = Artifact::parse("file:docs/api.md (optional)").unwrap().artifact;
        assert!(b.optional);
        assert_eq!(b.name, "docs/api.md");
    }

    #[test]
    fn artifact_parse_endpoint_keeps_spaces() {
        let a = Artifact::parse("endpoint:POST /api/login").unwrap().artifact;
        assert_eq!(a.kind, ArtifactKind::Endpoint);
        assert_eq!(a.name, "POST /api/login");
    }

    #[test]
    fn artifact_parse_unknown_prefix_falls_back_to_file() {
        let parsed = Artifact::parse("schema:users").unwrap();
        assert_eq!(parsed.artifact.kind, ArtifactKind::File);
        assert_eq!(parsed.artifact.name, "users");
        assert!(parsed.warning.unwrap().contains("schema"));
    }

    #[test]
    fn artifact_parse_empty_markers() {
        assert!(Artifact::parse("—").is_none());
        assert!(Artifact::parse("  ").is_none());
        assert!(Artifact::parse("none").is_none());
    }

    #[test]
    fn artifact_display_round_trips_through_parse() {
        let a = Artifact::new(ArtifactKind::Migration, "add_users").optional();
        let parsed = Artifact::parse(&a.to_string()).unwrap().artifact;
        assert_eq!(parsed, a);
    }

    #[test]
    fn artifact_kind_unknown_from_json() {
        let a: Artifact =
            serde_json::from_str(r#"{"kind":"graphql","name":"Query.user"}"#).unwrap();
        assert_eq!(a.kind, ArtifactKind::Unknown);
    }

    #[test]
    fn contract_matches_entry_by_stem_path_or_seq() {
        let entry = ExecutionTableEntry::new("02", "children/02-auth-api.md", vec![]);
        assert!(ContractEntry::new("02-auth-api").matches_entry(&entry));
        assert!(ContractEntry::new("children/02-auth-api.md").matches_entry(&entry));
        assert!(ContractEntry::new("02-auth-api.md").matches_entry(&entry));
        assert!(ContractEntry::new("2").matches_entry(&entry));
        assert!(!ContractEntry::new("20").matches_entry(&entry));
        assert!(!ContractEntry::new("03-other").matches_entry(&entry));
    }

    #[test]
    fn matrix_providers_ignore_optional_flag() {
        let matrix = ContractMatrix::new(vec![
            ContractEntry::new("01-model")
                .with_provides(vec![Artifact::new(ArtifactKind::Export, "UserModel")]),
        ]);
        let wanted = Artifact::new(ArtifactKind::Export, "UserModel").optional();
        assert_eq!(matrix.providers_of(&wanted).len(), 1);
        assert!(!matrix.is_provided(&Artifact::new(ArtifactKind::Type, "UserModel")));
    }
}
