use crate::domain::alerts::{AlertRule, UserSettings};
use crate::domain::market::SymbolMetrics;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Read access to the alert rule catalogue in the metadata store
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Load every catalogue entry. Idempotent; may be re-run to reload.
    async fn load_rules(&self) -> Result<Vec<AlertRule>>;
}

/// Read access to per-user notification preferences
#[async_trait]
pub trait UserSettingsRepository: Send + Sync {
    async fn load_all(&self) -> Result<Vec<UserSettings>>;
}

/// Read access to the freshest persisted metrics, used by the rule engine's
/// periodic re-evaluation tick
#[async_trait]
pub trait MetricsSnapshotRepository: Send + Sync {
    /// Reconstruct one snapshot per symbol from the newest stored row per
    /// (symbol, timeframe) within the window.
    async fn latest_snapshots(&self, window: Duration) -> Result<Vec<SymbolMetrics>>;
}
