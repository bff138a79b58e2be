//! Diagnostic tracing for cascade runs.
//!
//! Two layers share one registry:
//! - stderr, compact, filtered by `RUST_LOG` (default `cascade=info`, or
//!   `cascade=debug` with `--verbose`)
//! - JSON lines in `<config_dir>/logs/cascade.log.<date>`, written through a
//!   non-blocking daily appender
//!
//! User-facing progress lines are printed by `ui`, not through tracing.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn default_directive(verbose: bool) -> &'static str {
    if verbose { "cascade=debug" } else { "cascade=info" }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Install the global subscriber.
///
/// Returns the file writer guard when a log directory was given; keep it alive
/// for the duration of the process so buffered lines are flushed on exit.
/// A subscriber installed earlier (e.g. by a test harness) is left in place.
pub fn init(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .with_target(false)
        .with_filter(env_filter(verbose));

    let (file_layer, guard) = match log_dir.and_then(|dir| std::fs::create_dir_all(dir).ok().map(|_| dir)) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "cascade.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .json()
                .with_filter(env_filter(verbose));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized");
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_respects_verbose() {
        assert_eq!(default_directive(false), "cascade=info");
        assert_eq!(default_directive(true), "cascade=debug");
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let _first = init(false, Some(dir.path()));
        let _second = init(true, None);
        tracing::info!("logging initialized");
    }
}
