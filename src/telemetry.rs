//! Logging initialization.
//!
//! `RUST_LOG` takes precedence. Otherwise the level is `info`, or `debug`
//! with `--verbose`. Events go to stderr so stdout stays machine-readable.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

fn filter(verbose: bool) -> EnvFilter {
    let default = if verbose {
        "patchbridge=debug,info"
    } else {
        "info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init(verbose: bool, json: bool) {
    let registry = tracing_subscriber::registry().with(filter(verbose));
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("warning: logging already initialized: {e}");
    }
}
