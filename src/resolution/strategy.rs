//! Recovery strategies and the pure decision function.

use crate::config::ResolutionSection;
use crate::resolution::ledger::FailureRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the engine reacts when an entry's prerequisites are missing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Stop and wait for the operator.
    #[default]
    Pause,
    /// Queue repair tasks on the providers and re-run them.
    SelfHeal,
    /// Like self-heal, limited to `max_backtracks` per entry.
    Backtrack,
    /// Mark the entry skipped and move on.
    Skip,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::SelfHeal => "self-heal",
            Self::Backtrack => "backtrack",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "pause" => Ok(Self::Pause),
            "self-heal" | "selfheal" => Ok(Self::SelfHeal),
            "backtrack" => Ok(Self::Backtrack),
            "skip" => Ok(Self::Skip),
            other => Err(format!(
                "unknown resolution strategy '{}' (expected pause, self-heal, backtrack or skip)",
                other
            )),
        }
    }
}

/// Retry limits enforced by [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionLimits {
    pub max_prerequisite_failures: u32,
    pub max_backtracks: u32,
}

impl Default for ResolutionLimits {
    fn default() -> Self {
        Self::from(&ResolutionSection::default())
    }
}

impl From<&ResolutionSection> for ResolutionLimits {
    fn from(section: &ResolutionSection) -> Self {
        Self {
            max_prerequisite_failures: section.max_prerequisite_failures,
            max_backtracks: section.max_backtracks,
        }
    }
}

/// What to do about a failed prerequisite check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Pause { reason: String },
    SelfHeal,
    Backtrack,
    Skip,
}

/// Decide from the failure record alone; no side effects.
///
/// `record.prerequisite_failures` already counts the failure being decided.
pub fn decide(
    record: &FailureRecord,
    strategy: ResolutionStrategy,
    limits: &ResolutionLimits,
) -> Decision {
    if record.prerequisite_failures > limits.max_prerequisite_failures {
        return Decision::Pause {
            reason: format!(
                "entry {} failed its prerequisite check {} times (limit {})",
                record.seq, record.prerequisite_failures, limits.max_prerequisite_failures
            ),
        };
    }

    match strategy {
        ResolutionStrategy::Pause => Decision::Pause {
            reason: format!("entry {} is missing prerequisites", record.seq),
        },
        ResolutionStrategy::SelfHeal => Decision::SelfHeal,
        ResolutionStrategy::Backtrack if record.backtracks >= limits.max_backtracks => {
            Decision::Pause {
                reason: format!(
                    "entry {} already used {} backtrack(s)",
                    record.seq, record.backtracks
                ),
            }
        }
        ResolutionStrategy::Backtrack => Decision::Backtrack,
        ResolutionStrategy::Skip => Decision::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(failures: u32, backtracks: u32) -> FailureRecord {
        FailureRecord {
            seq: "02".into(),
            prerequisite_failures: failures,
            backtracks,
            ..Default::default()
        }
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("self-heal".parse::<ResolutionStrategy>(), Ok(ResolutionStrategy::SelfHeal));
        assert_eq!("Self_Heal".parse::<ResolutionStrategy>(), Ok(ResolutionStrategy::SelfHeal));
        assert_eq!("skip".parse::<ResolutionStrategy>(), Ok(ResolutionStrategy::Skip));
        assert!("retry".parse::<ResolutionStrategy>().is_err());
        assert_eq!(ResolutionStrategy::SelfHeal.to_string(), "self-heal");
    }

    #[test]
    fn test_forced_pause_on_third_failure() {
        let limits = ResolutionLimits::default();
        assert_eq!(
            decide(&record(2, 0), ResolutionStrategy::SelfHeal, &limits),
            Decision::SelfHeal
        );
        assert!(matches!(
            decide(&record(3, 0), ResolutionStrategy::SelfHeal, &limits),
            Decision::Pause { .. }
        ));
        assert!(matches!(
            decide(&record(3, 0), ResolutionStrategy::Skip, &limits),
            Decision::Pause { .. }
        ));
    }

    #[test]
    fn test_backtrack_at_most_once() {
        let limits = ResolutionLimits::default();
        assert_eq!(
            decide(&record(1, 0), ResolutionStrategy::Backtrack, &limits),
            Decision::Backtrack
        );
        match decide(&record(2, 1), ResolutionStrategy::Backtrack, &limits) {
            Decision::Pause { reason } => assert!(reason.contains("backtrack")),
            other => panic!("expected pause, got {:?}", other),
        }
    }

    #[test]
    fn test_pause_and_skip_strategies() {
        let limits = ResolutionLimits::default();
        assert!(matches!(
            decide(&record(1, 0), ResolutionStrategy::Pause, &limits),
            Decision::Pause { .. }
        ));
        assert_eq!(
            decide(&record(1, 0), ResolutionStrategy::Skip, &limits),
            Decision::Skip
        );
    }
}
