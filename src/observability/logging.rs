//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber for the binary
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the configured level
//! - Output goes to stderr so stdout stays the response body

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter directive for a configured level.
pub fn default_directive(level: &str) -> String {
    format!("safe_fetch={level},warn")
}

/// Install the global subscriber. Calling it twice is a no-op.
pub fn init(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive(level).into());

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
