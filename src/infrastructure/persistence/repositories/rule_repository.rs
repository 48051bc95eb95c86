use crate::domain::alerts::{AlertRule, Criteria, RuleType};
use crate::domain::repositories::RuleRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use tracing::{info, warn};

pub struct PgRuleRepository {
    pool: PgPool,
}

impl PgRuleRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RuleRepository for PgRuleRepository {
    async fn load_rules(&self) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query("SELECT rule_type, enabled, config, description FROM alert_rules")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load rule catalogue")?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_type: String = row.try_get("rule_type")?;
            let rule_type = match RuleType::from_str(&raw_type) {
                Ok(rule_type) => rule_type,
                Err(_) => {
                    warn!("Skipping catalogue row with unknown rule_type '{}'", raw_type);
                    continue;
                }
            };

            let config: Option<serde_json::Value> = row.try_get("config")?;
            let criteria = config
                .map(|value| {
                    serde_json::from_value::<Criteria>(value).unwrap_or_else(|e| {
                        warn!("Malformed criteria for {}: {}", raw_type, e);
                        Criteria::default()
                    })
                })
                .unwrap_or_default();

            rules.push(AlertRule {
                rule_type,
                description: row.try_get("description")?,
                criteria,
                enabled: row.try_get("enabled")?,
            });
        }

        info!("Loaded {} alert rules from catalogue", rules.len());
        Ok(rules)
    }
}
