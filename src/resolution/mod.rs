//! Recovery protocol for entries whose prerequisites are missing.
//!
//! [`decide`] maps a failure record and strategy to a [`Decision`] with the
//! retry limits enforced in one place. [`ResolutionEngine`] applies it:
//! repair tasks on provider documents, provider resets, skips, or a pause.

pub mod engine;
pub mod ledger;
pub mod strategy;

pub use engine::{ResolutionEngine, ResolutionOutcome};
pub use ledger::{FailureLedger, FailureRecord};
pub use strategy::{Decision, ResolutionLimits, ResolutionStrategy, decide};
