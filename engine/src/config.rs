//! Engine Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;

/// Name of the settings object every access decision depends on.
pub const SETTINGS_CONFIG_NAME: &str = "og.settings";

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Group owners get every permission in their own groups.
    pub owner_full_access: bool,

    /// Logging setup.
    pub observability: ObservabilityConfig,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive (e.g. "`og_engine=debug`")
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "og_engine=info".into(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `OG_OWNER_FULL_ACCESS`: Grant owners full access (default: false)
    /// - `OG_LOG_LEVEL`: Log filter directive (default: "`og_engine=info`")
    /// - `OG_LOG_JSON`: Log as JSON (default: false)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            owner_full_access: parse_bool("OG_OWNER_FULL_ACCESS")?.unwrap_or(false),
            observability: ObservabilityConfig {
                log_level: env::var("OG_LOG_LEVEL").unwrap_or_else(|_| "og_engine=info".into()),
                json: parse_bool("OG_LOG_JSON")?.unwrap_or(false),
            },
        })
    }

    /// Create a default configuration for testing.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            owner_full_access: false,
            observability: ObservabilityConfig {
                log_level: "og_engine=debug".into(),
                json: false,
            },
        }
    }
}

fn parse_bool(name: &str) -> Result<Option<bool>> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
            other => Err(anyhow::anyhow!("expected a boolean, got {other:?}"))
                .with_context(|| format!("{name} is not a valid boolean")),
        },
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("{name} could not be read")),
    }
}
