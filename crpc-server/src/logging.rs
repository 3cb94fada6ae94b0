//! Structured logging initialization.
//!
//! `RUST_LOG` takes precedence over the `--log-level` argument.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub(crate) fn init(level: &str) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_thread_names(true))
        .init();
}
