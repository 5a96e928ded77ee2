//! Tracing subscriber setup for the `tribunal` binary.
//!
//! Lifecycle events from [`crate::obs`] and the mirrored state log lines
//! all go through the subscriber installed here.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// `RUST_LOG` if set, otherwise `level` for every target.
fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber, writing to stderr.
///
/// With `json` every event becomes one JSON line, which keeps the
/// `event = "..."` fields machine-filterable. A second call is a no-op.
pub fn init_tracing(json: bool, level: Level) {
    let registry = tracing_subscriber::registry().with(filter(level));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let installed = if json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
