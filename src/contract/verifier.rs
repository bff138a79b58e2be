//! Pre- and post-execution contract verification.

use crate::config::VerificationSection;
use crate::contract::checks::{
    SourceSet, endpoint_pattern, export_pattern, find_file, find_migration, type_pattern,
};
use crate::plan::types::{Artifact, ArtifactKind, ContractMatrix, ExecutionTableEntry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A required artifact that could not be found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingArtifact {
    pub artifact: Artifact,
    pub reason: String,
}

/// Outcome of checking a set of artifacts. Never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// (artifact, where it was found)
    pub satisfied: Vec<(Artifact, String)>,
    pub missing: Vec<MissingArtifact>,
    pub warnings: Vec<String>,
}

impl VerificationReport {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn missing_artifacts(&self) -> Vec<Artifact> {
        self.missing.iter().map(|m| m.artifact.clone()).collect()
    }

    /// `type:name, type:name` of everything missing.
    pub fn missing_summary(&self) -> String {
        self.missing
            .iter()
            .map(|m| m.artifact.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

enum Lookup {
    Found(String),
    NotFound,
    Invalid(String),
}

pub struct ContractVerifier {
    root: PathBuf,
    settings: VerificationSection,
}

impl ContractVerifier {
    pub fn new(root: impl Into<PathBuf>, settings: VerificationSection) -> Self {
        Self {
            root: root.into(),
            settings,
        }
    }

    /// Same settings, different search root (e.g. a wave worktree).
    pub fn at(&self, root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            settings: self.settings.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check that everything `entry` requires exists before it runs.
    pub fn verify_prerequisites(
        &self,
        entry: &ExecutionTableEntry,
        contracts: &ContractMatrix,
    ) -> VerificationReport {
        match contracts.for_entry(entry) {
            Some(contract) => self.verify_artifacts(&contract.requires),
            None => VerificationReport::default(),
        }
    }

    /// Check that everything `entry` promised exists after it ran.
    pub fn verify_provides(
        &self,
        entry: &ExecutionTableEntry,
        contracts: &ContractMatrix,
    ) -> VerificationReport {
        match contracts.for_entry(entry) {
            Some(contract) => self.verify_artifacts(&contract.provides),
            None => VerificationReport::default(),
        }
    }

    pub fn verify_artifacts(&self, artifacts: &[Artifact]) -> VerificationReport {
        let mut report = VerificationReport::default();
        if artifacts.is_empty() {
            return report;
        }

        let needs_sources = artifacts.iter().any(|a| {
            matches!(
                a.kind,
                ArtifactKind::Export | ArtifactKind::Type | ArtifactKind::Endpoint
            )
        });
        let sources = needs_sources.then(|| SourceSet::collect(&self.root, &self.settings));

        for artifact in artifacts {
            if artifact.kind == ArtifactKind::Unknown {
                report.warnings.push(format!(
                    "{} has an unknown kind; treated as satisfied",
                    artifact
                ));
                report
                    .satisfied
                    .push((artifact.clone(), "unverified".to_string()));
                continue;
            }

            let lookup = self.lookup(artifact, sources.as_ref());
            let reason = match lookup {
                Lookup::Found(location) => {
                    tracing::debug!(artifact = %artifact, location = %location, "Artifact found");
                    report.satisfied.push((artifact.clone(), location));
                    continue;
                }
                Lookup::NotFound => format!("{} not found under {}", artifact, self.root.display()),
                Lookup::Invalid(why) => format!("{} cannot be checked: {}", artifact, why),
            };

            if artifact.optional {
                report.warnings.push(format!("optional {}", reason));
            } else {
                report.missing.push(MissingArtifact {
                    artifact: artifact.clone(),
                    reason,
                });
            }
        }
        report
    }

    fn lookup(&self, artifact: &Artifact, sources: Option<&SourceSet>) -> Lookup {
        let search = |pattern: Result<regex::Regex, String>| match (pattern, sources) {
            (Err(why), _) => Lookup::Invalid(why),
            (Ok(re), Some(set)) => set.find(&re).map_or(Lookup::NotFound, Lookup::Found),
            (Ok(_), None) => Lookup::NotFound,
        };

        match artifact.kind {
            ArtifactKind::File => match find_file(&self.root, &artifact.name) {
                Ok(Some(found)) => Lookup::Found(found),
                Ok(None) => Lookup::NotFound,
                Err(why) => Lookup::Invalid(why),
            },
            ArtifactKind::Export => search(export_pattern(&artifact.name)),
            ArtifactKind::Type => search(type_pattern(&artifact.name)),
            ArtifactKind::Endpoint => search(endpoint_pattern(&artifact.name)),
            ArtifactKind::Migration => {
                find_migration(&self.root, &self.settings.migration_dirs, &artifact.name)
                    .map_or(Lookup::NotFound, Lookup::Found)
            }
            ArtifactKind::Unknown => Lookup::Found("unverified".to_string()),
        }
    }
}
