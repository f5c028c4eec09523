//! Logging setup.
//!
//! All logs go to **stderr**; stdout carries the plugin handshake line and
//! nothing else.
//!
//! `RUST_LOG` controls filtering, for example:
//!
//! ```bash
//! RUST_LOG=newrelic_provider=debug ./hemmer-provider-newrelic
//! RUST_LOG=warn,newrelic_provider::resources=debug ./hemmer-provider-newrelic
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Level used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_LOG_LEVEL: &str = "info";

fn subscriber(default_level: &str) -> impl tracing::Subscriber + Send + Sync + 'static {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    )
}

/// Install the global subscriber at the `info` default level.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default(DEFAULT_LOG_LEVEL);
}

/// Install the global subscriber, using `default_level` when `RUST_LOG` is unset.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Install the global subscriber unless one is already set.
///
/// Returns `false` if a subscriber was already installed, which makes it safe
/// to call from tests.
pub fn try_init_logging() -> bool {
    subscriber(DEFAULT_LOG_LEVEL).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    // The global subscriber can only be set once per process, so only the
    // filter directives and the idempotent entry point are exercised here.

    use super::*;

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_LEVEL).is_ok());
        assert!(EnvFilter::try_new("newrelic_provider=debug").is_ok());
        assert!(EnvFilter::try_new("warn,newrelic_provider::resources=trace").is_ok());
    }

    #[test]
    fn test_try_init_is_idempotent() {
        let _ = try_init_logging();
        assert!(!try_init_logging());
    }
}
