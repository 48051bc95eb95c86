//! Metrics engine and bus configuration.

use crate::domain::market::Timeframe;
use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker shards; all bars for one symbol land on the same shard
    pub shards: usize,
    /// Whether raw 1-minute bars are also persisted for recovery
    pub persist_raw_candles: bool,
    /// Timeframe whose previous completed period feeds the pivot ladder
    pub pivot_timeframe: Timeframe,
    /// Bus retention window for all three streams
    pub bus_max_age: Duration,
    /// Bus retained-message cap per stream
    pub bus_max_messages: usize,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        let pivot_raw = super::parse_string("PIVOT_TIMEFRAME", "1h");
        let pivot_timeframe = Timeframe::from_str(&pivot_raw)
            .with_context(|| format!("Invalid PIVOT_TIMEFRAME: '{}'", pivot_raw))?;

        Ok(Self {
            shards: super::parse_usize("ENGINE_SHARDS", 4)?.max(1),
            persist_raw_candles: super::parse_bool("PERSIST_RAW_CANDLES", true),
            pivot_timeframe,
            bus_max_age: Duration::from_secs(super::parse_u64("BUS_RETENTION_SECS", 3600)?),
            bus_max_messages: super::parse_usize("BUS_MAX_MESSAGES", 100_000)?,
        })
    }
}
