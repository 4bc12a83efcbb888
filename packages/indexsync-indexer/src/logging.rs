//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Env var holding the filter directive (e.g. `indexsync_indexer=debug`)
pub const LOG_ENV: &str = "INDEXSYNC_LOG";

const DEFAULT_FILTER: &str = "info";

/// Install a fmt subscriber for the process
///
/// The filter is taken from `filter`, else `INDEXSYNC_LOG`, else `info`.
/// Returns `false` when a global subscriber was already installed.
pub fn init(filter: Option<&str>) -> bool {
    let filter = match filter {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
