//! Tracing subscriber initialization.
//!
//! Embedders that already install a subscriber can skip this; the engine only
//! emits `tracing` events and spans.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Fails if a global
/// subscriber is already set.
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
