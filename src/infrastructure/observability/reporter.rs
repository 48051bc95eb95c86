//! Push-based metrics reporter.
//!
//! Periodically outputs a snapshot of the pipeline counters as structured
//! JSON to stdout. This system only sends data, it never accepts requests;
//! collection happens through log aggregation.

use crate::infrastructure::observability::Metrics;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::info;

/// Counter snapshot for JSON output
#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub version: String,
    pub candles_processed: f64,
    pub bars_rejected: f64,
    pub metrics_events: f64,
    pub alerts_triggered: f64,
    pub alerts_deduplicated: f64,
    pub webhook_deliveries: f64,
    pub persist_flushes: f64,
    pub persist_rows_dropped: f64,
    pub ws_reconnects: f64,
}

pub struct MetricsReporter {
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    fn collect_snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        self.metrics.uptime_seconds.set(uptime as f64);

        MetricsSnapshot {
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            candles_processed: self
                .metrics
                .family_total("screener_candles_processed_total"),
            bars_rejected: self
                .metrics
                .family_total("screener_bars_validation_failed_total"),
            metrics_events: self.metrics.family_total("screener_metrics_events_total"),
            alerts_triggered: self.metrics.family_total("screener_alerts_triggered_total"),
            alerts_deduplicated: self
                .metrics
                .family_total("screener_alerts_deduplicated_total"),
            webhook_deliveries: self
                .metrics
                .family_total("screener_webhook_deliveries_total"),
            persist_flushes: self.metrics.family_total("screener_persist_flushes_total"),
            persist_rows_dropped: self
                .metrics
                .family_total("screener_persist_rows_dropped_total"),
            ws_reconnects: self.metrics.family_total("screener_ws_reconnects_total"),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "MetricsReporter: push-based metrics every {:?} (JSON to stdout)",
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // immediate first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.collect_snapshot();
                    if let Ok(json) = serde_json::to_string(&snapshot) {
                        // Prefixed so log collectors can filter these lines
                        println!("METRICS_JSON:{}", json);
                    }
                    info!(
                        "Pipeline: candles={} metrics={} alerts={} (dedup {}) | uptime {}s",
                        snapshot.candles_processed,
                        snapshot.metrics_events,
                        snapshot.alerts_triggered,
                        snapshot.alerts_deduplicated,
                        snapshot.uptime_seconds
                    );
                }
                _ = shutdown.changed() => {
                    info!("MetricsReporter: shutdown received");
                    return;
                }
            }
        }
    }
}
