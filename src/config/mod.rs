//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on malformed values. Every variable
//! is optional; unset ones take the documented default.
//!
//! | variable                           | default    |
//! |------------------------------------|------------|
//! | `CASEFLOW_STAGE_REGISTRY`          | built-in   |
//! | `CASEFLOW_WAIT_REFRESH_SECS`       | 60         |
//! | `CASEFLOW_COLLABORATOR_TIMEOUT_MS` | 2000       |
//! | `CASEFLOW_DELIVERY_MAX_ATTEMPTS`   | 5          |
//! | `OTEL_ENDPOINT`                    | unset      |
//! | `LOG_LEVEL`                        | info       |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::registry::StageRegistry;
use crate::telemetry::TelemetryConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// TOML stage registry. `None` uses the built-in journey.
    pub stage_registry: Option<PathBuf>,
    pub wait_refresh_secs: u64,
    pub collaborator_timeout_ms: u64,
    pub delivery_max_attempts: u32,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stage_registry: None,
            wait_refresh_secs: 60,
            collaborator_timeout_ms: 2000,
            delivery_max_attempts: 5,
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            stage_registry: lookup("CASEFLOW_STAGE_REGISTRY")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            wait_refresh_secs: parsed(&lookup, "CASEFLOW_WAIT_REFRESH_SECS")?
                .unwrap_or(defaults.wait_refresh_secs),
            collaborator_timeout_ms: parsed(&lookup, "CASEFLOW_COLLABORATOR_TIMEOUT_MS")?
                .unwrap_or(defaults.collaborator_timeout_ms),
            delivery_max_attempts: parsed(&lookup, "CASEFLOW_DELIVERY_MAX_ATTEMPTS")?
                .unwrap_or(defaults.delivery_max_attempts),
            otel_endpoint: lookup("OTEL_ENDPOINT").filter(|e| !e.trim().is_empty()),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        if config.wait_refresh_secs == 0 {
            return Err(Error::Config(
                "CASEFLOW_WAIT_REFRESH_SECS must be at least 1".to_string(),
            ));
        }
        if config.collaborator_timeout_ms == 0 {
            return Err(Error::Config(
                "CASEFLOW_COLLABORATOR_TIMEOUT_MS must be at least 1".to_string(),
            ));
        }
        if config.delivery_max_attempts == 0 {
            return Err(Error::Config(
                "CASEFLOW_DELIVERY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            wait_refresh: Duration::from_secs(self.wait_refresh_secs),
            collaborator_timeout: Duration::from_millis(self.collaborator_timeout_ms),
            delivery_max_attempts: self.delivery_max_attempts,
        }
    }

    pub fn telemetry_config(&self, service_name: &str) -> TelemetryConfig {
        TelemetryConfig {
            endpoint: self.otel_endpoint.clone(),
            service_name: service_name.to_string(),
            log_level: self.log_level.clone(),
        }
    }

    /// The configured registry, or the built-in one.
    pub fn load_registry(&self) -> Result<StageRegistry> {
        match self.stage_registry {
            Some(ref path) => StageRegistry::load_from_file(path),
            None => Ok(StageRegistry::builtin()),
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}")))
        })
        .transpose()
}
