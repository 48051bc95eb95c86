//! Rule evaluation and notification configuration.

use anyhow::Result;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Periodic re-evaluation tick against the freshest stored metrics
    pub poll_interval: Duration,
    /// How far back the poll looks for fresh metrics rows
    pub poll_window: Duration,
    /// Cooldown during which a (symbol, rule, minute) repeat is suppressed
    pub dedup_ttl: Duration,
    /// Static webhook sinks, independent of per-user settings
    pub webhook_urls: Vec<String>,
    /// Hard ceiling per outbound webhook request
    pub webhook_timeout: Duration,
    /// How often cached user notification settings are refreshed
    pub settings_refresh: Duration,
}

impl AlertConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            poll_interval: Duration::from_secs(super::parse_u64("ALERT_POLL_INTERVAL_SECS", 5)?),
            poll_window: Duration::from_secs(super::parse_u64("ALERT_POLL_WINDOW_SECS", 300)?),
            dedup_ttl: Duration::from_secs(super::parse_u64("ALERT_DEDUP_TTL_SECS", 60)?),
            webhook_urls: super::parse_csv("WEBHOOK_URLS"),
            webhook_timeout: Duration::from_secs(super::parse_u64("WEBHOOK_TIMEOUT_SECS", 10)?),
            settings_refresh: Duration::from_secs(super::parse_u64(
                "SETTINGS_REFRESH_SECS",
                60,
            )?),
        })
    }
}
