//! Version-control surface: validated names and the branch lifecycle.

pub mod branch;
pub mod manager;

pub use branch::{
    checkpoint_tag_name, child_branch_name, feature_branch_name, slugify, validate_branch_name,
};
pub use manager::{
    BranchManager, ConflictResolution, FinalizeOptions, FinalizeOutcome, MergeOutcome,
};
