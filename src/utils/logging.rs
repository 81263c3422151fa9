//! Tracing setup shared by the `broker`, `server` and `worker` commands.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the configured
//! `log.level`, which may be a plain level (`debug`) or full directives
//! (`wordcount=debug,sled=warn`).

use tracing_subscriber::EnvFilter;

const FALLBACK_LEVEL: &str = "info";

/// Filter for `level`, with `RUST_LOG` taking precedence.
pub fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
}

/// Install the fmt subscriber. Returns `false` if one was already installed,
/// which lets tests and `main` call this more than once.
pub fn init(level: &str) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .try_init()
        .is_ok()
}
