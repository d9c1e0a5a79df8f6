//! Configuration management
//!
//! Settings come from an optional TOML file, then `AMBERDATA_*` environment
//! variables (nested keys use `__`, e.g. `AMBERDATA_HTTP__MAX_WORKERS`).
//! A `.env` file in the working directory is loaded first.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::client::{LEGACY_WEBSOCKET_URL, PRODUCTION_BASE_URL};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Vendor API key, sent as `x-api-key`
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_websocket_url")]
    pub websocket_url: String,
    #[serde(default)]
    pub http: HttpSettings,
    pub twilio: Option<TwilioSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    /// Attempts per page before a paginated fetch gives up on it
    pub max_page_attempts: u32,
    pub retry_delay_ms: u64,
    /// Concurrent requests for fan-out fetches
    pub max_workers: usize,
    /// Ceiling on "Too Many Requests" retries for a single call
    pub rate_limit_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioSettings {
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
    pub to: String,
}

fn default_base_url() -> String {
    PRODUCTION_BASE_URL.to_string()
}

fn default_websocket_url() -> String {
    LEGACY_WEBSOCKET_URL.to_string()
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_page_attempts: 3,
            retry_delay_ms: 2000,
            max_workers: 11,
            rate_limit_retries: 50,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Settings {
    /// Load settings from an optional file plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("AMBERDATA")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .context("Failed to build configuration")?;

        let settings: Settings = settings
            .try_deserialize()
            .context("Invalid configuration (is AMBERDATA_API_KEY set?)")?;

        if settings.api_key.trim().is_empty() {
            anyhow::bail!("api_key must not be empty");
        }
        if settings.http.max_page_attempts == 0 {
            anyhow::bail!("http.max_page_attempts must be at least 1");
        }
        if settings.http.max_workers == 0 {
            anyhow::bail!("http.max_workers must be at least 1");
        }

        Ok(settings)
    }
}
