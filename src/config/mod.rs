//! Configuration module for the screener.
//!
//! Structured configuration loading from environment variables, organized by
//! concern: databases, ingestion, engine, alerting, and observability.

mod alert_config;
mod database_config;
mod engine_config;
mod ingest_config;
mod observability_config;

pub use alert_config::AlertConfig;
pub use database_config::DatabaseConfig;
pub use engine_config::EngineConfig;
pub use ingest_config::IngestConfig;
pub use observability_config::ObservabilityConfig;

use anyhow::{Context, Result};
use std::env;

/// Main application configuration, composed from the sub-config modules.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ingest: IngestConfig,
    pub engine: EngineConfig,
    pub alerts: AlertConfig,
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Missing required stores are a startup failure; everything else falls
    /// back to defaults.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env().context("Failed to load database config")?,
            ingest: IngestConfig::from_env().context("Failed to load ingest config")?,
            engine: EngineConfig::from_env().context("Failed to load engine config")?,
            alerts: AlertConfig::from_env().context("Failed to load alert config")?,
            observability: ObservabilityConfig::from_env(),
        })
    }
}

pub(crate) fn parse_u64(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("Failed to parse {} as u64: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_usize(name: &str, default: usize) -> Result<usize> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("Failed to parse {} as usize: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_u32(name: &str, default: u32) -> Result<u32> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u32>()
            .with_context(|| format!("Failed to parse {} as u32: '{}'", name, raw)),
        Err(_) => Ok(default),
    }
}

pub(crate) fn parse_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|raw| matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

pub(crate) fn parse_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn parse_csv(name: &str) -> Vec<String> {
    env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_helpers_fall_back_to_defaults() {
        assert_eq!(parse_u64("SCREENER_TEST_UNSET_U64", 17).unwrap(), 17);
        assert_eq!(parse_usize("SCREENER_TEST_UNSET_USIZE", 4).unwrap(), 4);
        assert!(parse_bool("SCREENER_TEST_UNSET_BOOL", true));
        assert_eq!(parse_string("SCREENER_TEST_UNSET_STR", "fallback"), "fallback");
        assert!(parse_csv("SCREENER_TEST_UNSET_CSV").is_empty());
    }

    #[test]
    fn test_parse_values_from_env() {
        // SAFETY: test-only env mutation with a key no other test reads
        unsafe {
            env::set_var("SCREENER_TEST_CSV", "BTCUSDT, ETHUSDT ,,SOLUSDT");
            env::set_var("SCREENER_TEST_BOOL", "yes");
            env::set_var("SCREENER_TEST_BAD_U64", "not-a-number");
        }

        assert_eq!(
            parse_csv("SCREENER_TEST_CSV"),
            vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]
        );
        assert!(parse_bool("SCREENER_TEST_BOOL", false));
        assert!(parse_u64("SCREENER_TEST_BAD_U64", 1).is_err());
    }
}
