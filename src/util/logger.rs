//! Tracing setup for load runs
//!
//! Every action logs at debug level, which is far too chatty once an
//! environment fans out hundreds of sessions. The default filter keeps the
//! engine at info; `RUST_LOG` or an explicit directive overrides it.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber, honoring `RUST_LOG` when set
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stampede=info"));
    install(filter);
}

/// Install the global subscriber with an explicit directive,
/// e.g. `"stampede=debug"`
pub fn init_logging_with(directives: &str) {
    install(EnvFilter::new(directives));
}

fn install(filter: EnvFilter) {
    // try_init so repeated calls (parallel test binaries, embedding apps
    // with their own subscriber) are a no-op instead of a panic.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_logging();
        init_logging_with("stampede=debug");
        init_logging();
    }
}
