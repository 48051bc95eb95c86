//! Prometheus metrics definitions for the screener.
//!
//! All metrics use the `screener_` prefix. Counters are incremented by the
//! owning component; the registry is created at startup and shared by clone.

use prometheus::{
    CounterVec, Gauge, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericCounter, GenericGauge},
};
use std::sync::Arc;

/// Process-wide observability counters
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Closed bars accepted by ingestion
    pub candles_processed_total: GenericCounter<AtomicF64>,
    /// Bars dropped by the ingestion validator
    pub bars_validation_failed_total: GenericCounter<AtomicF64>,
    /// Messages published per stream
    pub bus_published_total: CounterVec,
    /// Failed publishes by error kind
    pub bus_publish_errors_total: CounterVec,
    /// Metrics snapshots emitted
    pub metrics_events_total: GenericCounter<AtomicF64>,
    /// Alerts emitted per rule type
    pub alerts_triggered_total: CounterVec,
    /// Alerts suppressed by the dedup cooldown
    pub alerts_deduplicated_total: GenericCounter<AtomicF64>,
    /// Webhook deliveries by outcome
    pub webhook_deliveries_total: CounterVec,
    /// Batch flushes per table
    pub persist_flushes_total: CounterVec,
    /// Rows dropped per table (queue overflow or failed batch)
    pub persist_rows_dropped_total: CounterVec,
    /// Upstream WebSocket reconnection attempts
    pub ws_reconnects_total: GenericCounter<AtomicF64>,
    /// Server uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let candles_processed_total = GenericCounter::with_opts(Opts::new(
            "screener_candles_processed_total",
            "Closed bars accepted by ingestion",
        ))?;
        registry.register(Box::new(candles_processed_total.clone()))?;

        let bars_validation_failed_total = GenericCounter::with_opts(Opts::new(
            "screener_bars_validation_failed_total",
            "Bars dropped by the ingestion validator",
        ))?;
        registry.register(Box::new(bars_validation_failed_total.clone()))?;

        let bus_published_total = CounterVec::new(
            Opts::new("screener_bus_published_total", "Messages published per stream"),
            &["stream"],
        )?;
        registry.register(Box::new(bus_published_total.clone()))?;

        let bus_publish_errors_total = CounterVec::new(
            Opts::new(
                "screener_bus_publish_errors_total",
                "Failed publishes by error kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(bus_publish_errors_total.clone()))?;

        let metrics_events_total = GenericCounter::with_opts(Opts::new(
            "screener_metrics_events_total",
            "Metrics snapshots emitted",
        ))?;
        registry.register(Box::new(metrics_events_total.clone()))?;

        let alerts_triggered_total = CounterVec::new(
            Opts::new("screener_alerts_triggered_total", "Alerts emitted per rule type"),
            &["rule_type"],
        )?;
        registry.register(Box::new(alerts_triggered_total.clone()))?;

        let alerts_deduplicated_total = GenericCounter::with_opts(Opts::new(
            "screener_alerts_deduplicated_total",
            "Alerts suppressed by the dedup cooldown",
        ))?;
        registry.register(Box::new(alerts_deduplicated_total.clone()))?;

        let webhook_deliveries_total = CounterVec::new(
            Opts::new(
                "screener_webhook_deliveries_total",
                "Webhook deliveries by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(webhook_deliveries_total.clone()))?;

        let persist_flushes_total = CounterVec::new(
            Opts::new("screener_persist_flushes_total", "Batch flushes per table"),
            &["table"],
        )?;
        registry.register(Box::new(persist_flushes_total.clone()))?;

        let persist_rows_dropped_total = CounterVec::new(
            Opts::new(
                "screener_persist_rows_dropped_total",
                "Rows dropped per table",
            ),
            &["table"],
        )?;
        registry.register(Box::new(persist_rows_dropped_total.clone()))?;

        let ws_reconnects_total = GenericCounter::with_opts(Opts::new(
            "screener_ws_reconnects_total",
            "Upstream WebSocket reconnection attempts",
        ))?;
        registry.register(Box::new(ws_reconnects_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "screener_uptime_seconds",
            "Server uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            candles_processed_total,
            bars_validation_failed_total,
            bus_published_total,
            bus_publish_errors_total,
            metrics_events_total,
            alerts_triggered_total,
            alerts_deduplicated_total,
            webhook_deliveries_total,
            persist_flushes_total,
            persist_rows_dropped_total,
            ws_reconnects_total,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    /// Sum of every sample of one metric family, labels collapsed.
    ///
    /// Works off the text exposition so it stays agnostic of the registry's
    /// internal protobuf types.
    pub fn family_total(&self, name: &str) -> f64 {
        self.render()
            .lines()
            .filter(|line| !line.starts_with('#'))
            .filter(|line| {
                line.split(['{', ' '])
                    .next()
                    .is_some_and(|sample| sample == name)
            })
            .filter_map(|line| line.rsplit(' ').next()?.parse::<f64>().ok())
            .sum()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default Metrics")
    }
}
