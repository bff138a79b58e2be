//! Durable, resumable, single-owner orchestration sessions.

pub mod manager;
pub mod state;

pub use manager::{
    AcquiredSession, SessionManager, ensure_gitignore, is_process_alive, recover_in_progress,
};
pub use state::{PendingMerge, SessionState, SessionStatus};
