//! Artifact contract verification.

pub mod checks;
pub mod verifier;

pub use verifier::{ContractVerifier, MissingArtifact, VerificationReport};
