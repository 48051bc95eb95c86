//! Upstream exchange ingestion configuration.

use anyhow::Result;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Futures REST endpoint, used for instrument discovery
    pub rest_base_url: String,
    /// Futures WebSocket endpoint for per-symbol kline streams
    pub ws_base_url: String,
    /// How many top-volume perpetual contracts to track
    pub symbol_limit: usize,
    /// Explicit symbol override; bypasses discovery when non-empty
    pub symbols: Vec<String>,
    /// Reconnect backoff base
    pub reconnect_base: Duration,
    /// Reconnect backoff cap
    pub reconnect_cap: Duration,
    /// Consecutive connection failures before a worker surrenders
    pub max_failures: u32,
    /// Upstream heartbeat interval; the idle-read timeout is 1.5x this
    pub heartbeat_interval: Duration,
    /// Delay before the supervisor respawns a surrendered worker
    pub respawn_cooldown: Duration,
}

impl IngestConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            rest_base_url: super::parse_string(
                "BINANCE_FUTURES_REST_URL",
                "https://fapi.binance.com",
            ),
            ws_base_url: super::parse_string(
                "BINANCE_FUTURES_WS_URL",
                "wss://fstream.binance.com/ws",
            ),
            symbol_limit: super::parse_usize("SYMBOL_LIMIT", 150)?,
            symbols: super::parse_csv("SYMBOLS"),
            reconnect_base: Duration::from_secs(super::parse_u64("RECONNECT_BASE_SECS", 2)?),
            reconnect_cap: Duration::from_secs(super::parse_u64("RECONNECT_CAP_SECS", 30)?),
            max_failures: super::parse_u32("MAX_CONSECUTIVE_FAILURES", 10)?,
            heartbeat_interval: Duration::from_secs(super::parse_u64(
                "UPSTREAM_HEARTBEAT_SECS",
                120,
            )?),
            respawn_cooldown: Duration::from_secs(super::parse_u64("RESPAWN_COOLDOWN_SECS", 60)?),
        })
    }

    /// Idle-read timeout: 1.5x the upstream heartbeat interval
    pub fn idle_read_timeout(&self) -> Duration {
        self.heartbeat_interval * 3 / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_read_timeout_is_one_and_a_half_heartbeats() {
        let config = IngestConfig {
            rest_base_url: String::new(),
            ws_base_url: String::new(),
            symbol_limit: 150,
            symbols: vec![],
            reconnect_base: Duration::from_secs(2),
            reconnect_cap: Duration::from_secs(30),
            max_failures: 10,
            heartbeat_interval: Duration::from_secs(120),
            respawn_cooldown: Duration::from_secs(60),
        };
        assert_eq!(config.idle_read_timeout(), Duration::from_secs(180));
    }
}
