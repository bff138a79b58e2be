//! Pre-flight coherence audit of a decomposed plan.

pub mod checker;
pub mod report;
pub mod similarity;

pub use checker::{ChildDocument, CoherenceChecker, load_children};
pub use report::{AutoFix, CoherenceIssue, CoherenceReport, Severity, apply_auto_fixes};
