//! Plan execution: the sequential loop, the wave broker and the child
//! executor seam.

pub mod events;
pub mod executor;
pub mod runner;
pub mod wave;

pub use events::{EventSink, RunEvent, RunSummary};
pub use executor::{ChildExecutor, CommandExecutor, ExecutionOutcome, ExecutionRequest};
pub use runner::{Orchestrator, RunOptions};
pub use wave::WaveBroker;
