//! Observability configuration.

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    /// Seconds between pushed metric snapshots
    pub interval_secs: u64,
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: super::parse_bool("OBSERVABILITY_ENABLED", true),
            interval_secs: super::parse_u64("OBSERVABILITY_INTERVAL", 60).unwrap_or(60),
        }
    }
}
