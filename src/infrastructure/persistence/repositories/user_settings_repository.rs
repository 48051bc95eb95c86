use crate::domain::alerts::{RuleType, UserSettings};
use crate::domain::repositories::UserSettingsRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::str::FromStr;

pub struct PgUserSettingsRepository {
    pool: PgPool,
}

impl PgUserSettingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserSettingsRepository for PgUserSettingsRepository {
    async fn load_all(&self) -> Result<Vec<UserSettings>> {
        let rows = sqlx::query(
            "SELECT user_id, selected_alerts, webhook_url, notification_enabled FROM user_settings",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load user settings")?;

        rows.into_iter()
            .map(|row| {
                let selected_raw: Vec<String> = row.try_get("selected_alerts")?;
                // Unknown identifiers are silently ignored; the gateway owns
                // validation of what users may select.
                let selected_alerts = selected_raw
                    .iter()
                    .filter_map(|raw| RuleType::from_str(raw).ok())
                    .collect();

                Ok(UserSettings {
                    user_id: row.try_get("user_id")?,
                    selected_alerts,
                    webhook_url: row.try_get("webhook_url")?,
                    notification_enabled: row.try_get("notification_enabled")?,
                })
            })
            .collect()
    }
}
