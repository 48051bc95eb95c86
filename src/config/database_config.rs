//! Database and batch persistence configuration.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Connection settings for the two logical stores plus batch writer tuning
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Time-series store (candles, metrics, alert history)
    pub timeseries_url: String,
    /// Metadata store (rule catalogue, user settings)
    pub metadata_url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    /// Per-flush statement deadline
    pub statement_timeout: Duration,

    // Batch writer tuning
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub queue_capacity: usize,
    /// How long a draining writer may keep flushing after shutdown
    pub drain_grace: Duration,
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self> {
        let timeseries_url =
            env::var("TIMESERIES_DB_URL").context("TIMESERIES_DB_URL is required")?;
        let metadata_url = env::var("METADATA_DB_URL").context("METADATA_DB_URL is required")?;

        Ok(Self {
            timeseries_url,
            metadata_url,
            max_connections: super::parse_u32("DB_MAX_CONNECTIONS", 10)?,
            acquire_timeout: Duration::from_secs(super::parse_u64("DB_ACQUIRE_TIMEOUT_SECS", 5)?),
            idle_timeout: Duration::from_secs(super::parse_u64("DB_IDLE_TIMEOUT_SECS", 300)?),
            max_lifetime: Duration::from_secs(super::parse_u64("DB_MAX_LIFETIME_SECS", 1800)?),
            statement_timeout: Duration::from_secs(super::parse_u64(
                "DB_STATEMENT_TIMEOUT_SECS",
                10,
            )?),
            batch_size: super::parse_usize("PERSIST_BATCH_SIZE", 50)?,
            flush_interval: Duration::from_secs(super::parse_u64("PERSIST_FLUSH_INTERVAL_SECS", 5)?),
            queue_capacity: super::parse_usize("PERSIST_QUEUE_CAPACITY", 10_000)?,
            drain_grace: Duration::from_secs(super::parse_u64("PERSIST_DRAIN_GRACE_SECS", 5)?),
        })
    }
}
