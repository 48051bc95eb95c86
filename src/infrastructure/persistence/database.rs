//! Connection pools and startup schema for the two logical stores.
//!
//! The pipeline is the only writer of the time-series store, so schema is
//! established here at startup rather than through external migrations.
//! Hypertable conversion and retention policies are attempted opportunistically
//! and skipped when TimescaleDB is not installed.

use crate::config::DatabaseConfig;
use crate::domain::alerts::AlertRule;
use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

/// One bounded pool over a logical store
#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn connect(url: &str, config: &DatabaseConfig, label: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(url)
            .await
            .with_context(|| format!("Failed to connect to {} store", label))?;

        info!("Connected to {} store", label);
        Ok(Self { pool })
    }

    /// Create the time-series tables and best-effort Timescale policies
    pub async fn init_timeseries_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles_1m (
                time TIMESTAMPTZ NOT NULL,
                symbol TEXT NOT NULL,
                open DOUBLE PRECISION NOT NULL,
                high DOUBLE PRECISION NOT NULL,
                low DOUBLE PRECISION NOT NULL,
                close DOUBLE PRECISION NOT NULL,
                volume DOUBLE PRECISION NOT NULL,
                quote_volume DOUBLE PRECISION NOT NULL,
                trades BIGINT NOT NULL,
                PRIMARY KEY (time, symbol)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create candles_1m table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metrics_calculated (
                time TIMESTAMPTZ NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                open DOUBLE PRECISION NOT NULL,
                high DOUBLE PRECISION NOT NULL,
                low DOUBLE PRECISION NOT NULL,
                close DOUBLE PRECISION NOT NULL,
                volume DOUBLE PRECISION NOT NULL,
                price_change DOUBLE PRECISION,
                volume_ratio DOUBLE PRECISION,
                vcp DOUBLE PRECISION,
                rsi_14 DOUBLE PRECISION,
                macd DOUBLE PRECISION,
                macd_signal DOUBLE PRECISION,
                bb_upper DOUBLE PRECISION,
                bb_middle DOUBLE PRECISION,
                bb_lower DOUBLE PRECISION,
                fib_r3 DOUBLE PRECISION,
                fib_r2 DOUBLE PRECISION,
                fib_r1 DOUBLE PRECISION,
                fib_pivot DOUBLE PRECISION,
                fib_s1 DOUBLE PRECISION,
                fib_s2 DOUBLE PRECISION,
                fib_s3 DOUBLE PRECISION,
                PRIMARY KEY (time, symbol, timeframe)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create metrics_calculated table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alert_history (
                time TIMESTAMPTZ NOT NULL,
                symbol TEXT NOT NULL,
                rule_type TEXT NOT NULL,
                description TEXT NOT NULL,
                price DOUBLE PRECISION NOT NULL,
                metadata JSONB,
                PRIMARY KEY (time, symbol, rule_type)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create alert_history table")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_metrics_symbol_tf_time
            ON metrics_calculated (symbol, timeframe, time DESC);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create metrics index")?;

        // TimescaleDB is optional; these fail harmlessly on plain Postgres.
        for table in ["candles_1m", "metrics_calculated", "alert_history"] {
            let hypertable = format!(
                "SELECT create_hypertable('{}', 'time', if_not_exists => TRUE);",
                table
            );
            if sqlx::query(&hypertable).execute(&self.pool).await.is_err() {
                debug!("Timescale not available, {} stays a plain table", table);
                continue;
            }
            let retention = format!(
                "SELECT add_retention_policy('{}', INTERVAL '48 hours', if_not_exists => TRUE);",
                table
            );
            let _ = sqlx::query(&retention).execute(&self.pool).await;
        }

        info!("Time-series schema initialized.");
        Ok(())
    }

    /// Create the metadata tables
    pub async fn init_metadata_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alert_rules (
                rule_type TEXT UNIQUE NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                config JSONB,
                description TEXT NOT NULL DEFAULT ''
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create alert_rules table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_settings (
                user_id TEXT UNIQUE NOT NULL,
                selected_alerts TEXT[] NOT NULL DEFAULT '{}',
                webhook_url TEXT,
                notification_enabled BOOLEAN NOT NULL DEFAULT FALSE
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create user_settings table")?;

        info!("Metadata schema initialized.");
        Ok(())
    }

    /// Seed the ten rule definitions. Idempotent: existing rows, including
    /// operator-edited ones, are left untouched.
    pub async fn seed_default_rules(&self) -> Result<()> {
        for rule in AlertRule::defaults() {
            sqlx::query(
                r#"
                INSERT INTO alert_rules (rule_type, enabled, config, description)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (rule_type) DO NOTHING
                "#,
            )
            .bind(rule.rule_type.as_str())
            .bind(rule.enabled)
            .bind(serde_json::to_value(&rule.criteria)?)
            .bind(&rule.description)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to seed rule {}", rule.rule_type))?;
        }

        info!("Rule catalogue seeded.");
        Ok(())
    }
}
