//! Logging setup.
//!
//! Everything goes to stderr; stdout belongs to the JSONL and MCP protocols.
//! `RUST_LOG` takes precedence over the configured default filter.

use std::sync::Once;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

static INIT: Once = Once::new();

/// Installs the global subscriber. Only the first call takes effect.
pub fn init(default_filter: &str) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::try_new(default_filter).unwrap_or_else(|_| EnvFilter::new("warn"))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_filter(filter);

        // A test harness may have installed a subscriber already.
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}
