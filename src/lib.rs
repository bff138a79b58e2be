pub mod coherence;
pub mod config;
pub mod contract;
pub mod dag;
pub mod errors;
pub mod gates;
pub mod git;
pub mod logging;
pub mod orchestrator;
pub mod plan;
pub mod resolution;
pub mod session;
pub mod ui;
pub mod util;
