//! Per-symbol stream consumer.
//!
//! Owns one kline WebSocket connection, discards intra-minute ticks,
//! validates closed bars and publishes them onto the `BARS` stream.
//! Reconnects with exponential backoff (base 2 s, cap 30 s) and surrenders
//! after too many consecutive failures; the failure counter resets on any
//! successfully published bar.

use crate::config::IngestConfig;
use crate::domain::errors::PublishError;
use crate::infrastructure::binance::{KlineConnection, bar_from_kline, parse_kline_event};
use crate::infrastructure::bus::{BARS_STREAM, StreamBus, bar_subject};
use crate::infrastructure::observability::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Why a worker's run loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Shutdown signal received
    Shutdown,
    /// Too many consecutive connection failures; supervisor may respawn
    Surrendered,
}

enum ReadExit {
    Shutdown,
    Disconnected,
}

pub struct IngestWorker {
    symbol: String,
    config: IngestConfig,
    bus: Arc<StreamBus>,
    metrics: Metrics,
    shutdown: watch::Receiver<bool>,
    failures: u32,
}

impl IngestWorker {
    pub fn new(
        symbol: String,
        config: IngestConfig,
        bus: Arc<StreamBus>,
        metrics: Metrics,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            symbol,
            config,
            bus,
            metrics,
            shutdown,
            failures: 0,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn backoff_delay(&self) -> Duration {
        let exp = self.config.reconnect_base.as_secs_f64()
            * 2f64.powi(self.failures.saturating_sub(1) as i32);
        let capped = exp.min(self.config.reconnect_cap.as_secs_f64());
        // Jitter spreads the reconnect stampede after an upstream outage
        let jitter = capped * 0.1 * rand::random::<f64>();
        Duration::from_secs_f64(capped + jitter)
    }

    /// Register a failed connection attempt; true when the worker should
    /// surrender instead of retrying.
    fn register_failure(&mut self) -> bool {
        self.failures += 1;
        self.metrics.ws_reconnects_total.inc();
        self.failures >= self.config.max_failures
    }

    pub async fn run(mut self) -> WorkerExit {
        loop {
            if *self.shutdown.borrow_and_update() {
                return WorkerExit::Shutdown;
            }

            let mut connection = tokio::select! {
                _ = self.shutdown.changed() => return WorkerExit::Shutdown,
                result = KlineConnection::connect(&self.config.ws_base_url, &self.symbol) => {
                    match result {
                        Ok(connection) => connection,
                        Err(e) => {
                            if self.register_failure() {
                                error!(
                                    "IngestWorker[{}]: surrendering after {} consecutive failures: {}",
                                    self.symbol, self.failures, e
                                );
                                return WorkerExit::Surrendered;
                            }
                            let delay = self.backoff_delay();
                            warn!(
                                "IngestWorker[{}]: connect failed ({}), retry {} in {:.1?}",
                                self.symbol, e, self.failures, delay
                            );
                            tokio::select! {
                                _ = self.shutdown.changed() => return WorkerExit::Shutdown,
                                _ = tokio::time::sleep(delay) => {}
                            }
                            continue;
                        }
                    }
                }
            };

            info!("IngestWorker[{}]: stream connected", self.symbol);

            match self.read_loop(&mut connection).await {
                ReadExit::Shutdown => {
                    connection.close().await;
                    return WorkerExit::Shutdown;
                }
                ReadExit::Disconnected => {
                    if self.register_failure() {
                        error!(
                            "IngestWorker[{}]: surrendering after {} consecutive failures",
                            self.symbol, self.failures
                        );
                        return WorkerExit::Surrendered;
                    }
                    let delay = self.backoff_delay();
                    warn!(
                        "IngestWorker[{}]: stream lost, reconnect {} in {:.1?}",
                        self.symbol, self.failures, delay
                    );
                    tokio::select! {
                        _ = self.shutdown.changed() => return WorkerExit::Shutdown,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn read_loop(&mut self, connection: &mut KlineConnection) -> ReadExit {
        let idle_timeout = self.config.idle_read_timeout();
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => return ReadExit::Shutdown,
                frame = tokio::time::timeout(idle_timeout, connection.next_text()) => {
                    match frame {
                        Err(_) => {
                            warn!(
                                "IngestWorker[{}]: no data for {:?}, dropping connection",
                                self.symbol, idle_timeout
                            );
                            return ReadExit::Disconnected;
                        }
                        Ok(Err(e)) => {
                            warn!("IngestWorker[{}]: read error: {}", self.symbol, e);
                            return ReadExit::Disconnected;
                        }
                        Ok(Ok(None)) => {
                            info!("IngestWorker[{}]: stream closed by upstream", self.symbol);
                            return ReadExit::Disconnected;
                        }
                        Ok(Ok(Some(text))) => self.handle_frame(&text),
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let raw = match parse_kline_event(text) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(
                    "IngestWorker[{}]: unparseable payload ({}): {}",
                    self.symbol, e, text
                );
                self.metrics.bars_validation_failed_total.inc();
                return;
            }
        };

        // Intra-minute tick; only closed bars leave the worker
        if !raw.is_closed {
            return;
        }

        let bar = match bar_from_kline(&raw) {
            Ok(bar) => bar,
            Err(e) => {
                warn!(
                    "IngestWorker[{}]: validation failed ({}): {}",
                    self.symbol, e, text
                );
                self.metrics.bars_validation_failed_total.inc();
                return;
            }
        };

        let payload = match serde_json::to_vec(&bar) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("IngestWorker[{}]: bar serialization failed: {}", self.symbol, e);
                return;
            }
        };

        match self.bus.publish(&bar_subject(&bar.symbol), payload) {
            Ok(seq) => {
                debug!(
                    "IngestWorker[{}]: published closed bar seq {} at {}",
                    self.symbol, seq, bar.close_time
                );
                self.metrics.candles_processed_total.inc();
                self.metrics
                    .bus_published_total
                    .with_label_values(&[BARS_STREAM])
                    .inc();
                self.failures = 0;
            }
            Err(e @ PublishError::Transient(_)) => {
                warn!("IngestWorker[{}]: transient publish failure: {}", self.symbol, e);
                self.metrics
                    .bus_publish_errors_total
                    .with_label_values(&["transient"])
                    .inc();
            }
            Err(e @ PublishError::Permanent(_)) => {
                error!("IngestWorker[{}]: bar dropped, {}", self.symbol, e);
                self.metrics
                    .bus_publish_errors_total
                    .with_label_values(&["permanent"])
                    .inc();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bus::StreamConfig;

    fn test_worker(bus: Arc<StreamBus>, metrics: Metrics) -> IngestWorker {
        let (_tx, rx) = watch::channel(false);
        let config = IngestConfig {
            rest_base_url: String::new(),
            ws_base_url: String::new(),
            symbol_limit: 1,
            symbols: vec![],
            reconnect_base: Duration::from_secs(2),
            reconnect_cap: Duration::from_secs(30),
            max_failures: 10,
            heartbeat_interval: Duration::from_secs(120),
            respawn_cooldown: Duration::from_secs(60),
        };
        IngestWorker::new("BTCUSDT".to_string(), config, bus, metrics, rx)
    }

    fn closed_frame(open: &str) -> String {
        format!(
            r#"{{"e":"kline","E":1704067260042,"s":"BTCUSDT","k":{{"t":1704067200000,"T":1704067259999,"s":"BTCUSDT","i":"1m","f":1,"L":340,"o":"{}","c":"42050.0","h":"42100.0","l":"41900.0","v":"12.5","n":340,"x":true,"q":"525000.0","V":"6.0","Q":"252000.0","B":"0"}}}}"#,
            open
        )
    }

    #[tokio::test]
    async fn test_closed_bar_published() {
        let bus = Arc::new(StreamBus::new());
        bus.add_stream(StreamConfig::new(BARS_STREAM, &["candles.1m.*"]))
            .unwrap();
        let metrics = Metrics::new().unwrap();
        let mut worker = test_worker(Arc::clone(&bus), metrics.clone());

        worker.handle_frame(&closed_frame("42000.0"));

        assert_eq!(bus.retained_count(BARS_STREAM).unwrap(), 1);
        assert_eq!(
            metrics.family_total("screener_candles_processed_total"),
            1.0
        );
    }

    #[tokio::test]
    async fn test_intra_minute_tick_discarded() {
        let bus = Arc::new(StreamBus::new());
        bus.add_stream(StreamConfig::new(BARS_STREAM, &["candles.1m.*"]))
            .unwrap();
        let metrics = Metrics::new().unwrap();
        let mut worker = test_worker(Arc::clone(&bus), metrics.clone());

        let frame = closed_frame("42000.0").replace("\"x\":true", "\"x\":false");
        worker.handle_frame(&frame);

        assert_eq!(bus.retained_count(BARS_STREAM).unwrap(), 0);
        assert_eq!(metrics.family_total("screener_candles_processed_total"), 0.0);
        assert_eq!(
            metrics.family_total("screener_bars_validation_failed_total"),
            0.0
        );
    }

    #[tokio::test]
    async fn test_invalid_bar_dropped_and_counted() {
        let bus = Arc::new(StreamBus::new());
        bus.add_stream(StreamConfig::new(BARS_STREAM, &["candles.1m.*"]))
            .unwrap();
        let metrics = Metrics::new().unwrap();
        let mut worker = test_worker(Arc::clone(&bus), metrics.clone());

        worker.handle_frame(&closed_frame(""));

        assert_eq!(bus.retained_count(BARS_STREAM).unwrap(), 0);
        assert_eq!(
            metrics.family_total("screener_bars_validation_failed_total"),
            1.0
        );
    }

    #[tokio::test]
    async fn test_publish_failure_counted_as_permanent() {
        // No BARS stream declared: publishing is a permanent error
        let bus = Arc::new(StreamBus::new());
        let metrics = Metrics::new().unwrap();
        let mut worker = test_worker(bus, metrics.clone());

        worker.handle_frame(&closed_frame("42000.0"));

        assert_eq!(
            metrics.family_total("screener_bus_publish_errors_total"),
            1.0
        );
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let bus = Arc::new(StreamBus::new());
        let mut worker = test_worker(bus, Metrics::new().unwrap());

        worker.failures = 1;
        let first = worker.backoff_delay();
        assert!(first >= Duration::from_secs(2));
        assert!(first < Duration::from_secs(3));

        worker.failures = 4;
        let fourth = worker.backoff_delay();
        assert!(fourth >= Duration::from_secs(16));

        worker.failures = 9;
        let capped = worker.backoff_delay();
        assert!(capped <= Duration::from_secs(33));
    }

    #[test]
    fn test_surrender_threshold() {
        let bus = Arc::new(StreamBus::new());
        let mut worker = test_worker(bus, Metrics::new().unwrap());
        for _ in 0..9 {
            assert!(!worker.register_failure());
        }
        assert!(worker.register_failure());
    }
}
