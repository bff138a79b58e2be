//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module    | Commands handled                   |
//! |-----------|------------------------------------|
//! | `project` | `Init`                             |
//! | `plan`    | `Check`, `Next`, `Waves`, `Verify` |
//! | `run`     | `Run`                              |
//! | `session` | `Status`, `Cancel`                 |
//! | `config`  | `Config`                           |

pub mod config;
pub mod plan;
pub mod project;
pub mod run;
pub mod session;

pub use config::cmd_config;
pub use plan::{cmd_check, cmd_next, cmd_verify, cmd_waves};
pub use project::cmd_init;
pub use run::cmd_run;
pub use session::{cmd_cancel, cmd_status};
