mod metrics_snapshot_repository;
mod rule_repository;
mod user_settings_repository;

pub use metrics_snapshot_repository::PgMetricsSnapshotRepository;
pub use rule_repository::PgRuleRepository;
pub use user_settings_repository::PgUserSettingsRepository;
