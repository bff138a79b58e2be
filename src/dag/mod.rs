//! Dependency graph over execution table entries.
//!
//! ## Architecture
//!
//! 1. **Builder** - Constructs and validates the graph (duplicates, self and
//!    unknown dependencies, cycles)
//! 2. **Scheduler** - Picks the next runnable entry from the current table
//! 3. **Waves** - Groups entries by dependency depth for parallel execution
//!
//! ## Example
//!
//! ```
//! use cascade::dag::{group_waves, find_next_executable, Selection};
//! use cascade::plan::ExecutionTableEntry;
//!
//! let entries = vec![
//!     ExecutionTableEntry::new("01", "01-model.md", vec![]),
//!     ExecutionTableEntry::new("02", "02-api.md", vec!["01".to_string()]),
//!     ExecutionTableEntry::new("03", "03-ui.md", vec!["01".to_string()]),
//! ];
//!
//! // Wave 0: [01], Wave 1: [02, 03]
//! let waves = group_waves(&entries).unwrap();
//! assert_eq!(waves.len(), 2);
//!
//! match find_next_executable(&entries) {
//!     Selection::Ready(entry) => assert_eq!(entry.seq, "01"),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

mod builder;
mod scheduler;
mod waves;

pub use builder::{DagBuilder, EntryGraph, EntryIndex};
pub use scheduler::{BlockReason, Selection, find_next_executable, ready_entries, safety_cap};
pub use waves::{compute_depths, group_waves};
