//! Plan documents: parsing, rendering and durable table storage.

pub mod mirror;
pub mod parser;
pub mod path;
pub mod store;
pub mod types;

pub use mirror::ExecutionMirror;
pub use parser::{
    append_acceptance_tasks, parse_acceptance_criteria, parse_plan, render_execution_table,
    replace_execution_table,
};
pub use path::validate_relative_path;
pub use store::PlanStore;
pub use types::{
    Artifact, ArtifactKind, ContractEntry, ContractMatrix, Criterion, EntryStatus,
    ExecutionTableEntry, ParseWarning, PlanDocument, find_entry, normalize_seq, seq_eq,
};
