//! Metrics engine: bars in, metrics snapshots out.
//!
//! Sole owner of every symbol's ring buffer. Bars are routed to a small
//! worker pool sharded by symbol hash, so independent symbols proceed in
//! parallel while all appends for one symbol stay serialized on one shard.

use crate::application::indicators::{
    self, BOLLINGER_PERIOD, BOLLINGER_WIDTH, RSI_PERIOD,
};
use crate::application::market_data::{SymbolWindow, WINDOW_CAPACITY, aggregate};
use crate::config::EngineConfig;
use crate::domain::market::{Bar, SymbolMetrics, Timeframe, TimeframeSnapshot};
use crate::infrastructure::bus::{
    BARS_STREAM, ConsumerKind, DeliverPolicy, METRICS_STREAM, METRICS_SUBJECT, StreamBus,
};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::{BatchWriter, CandleRow, MetricsRow};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Derive a full metrics snapshot from one symbol's window.
///
/// `bars` is the window in insertion order; the newest bar is the trigger.
/// The snapshot timestamp is that bar's close time. Returns `None` for an
/// empty window.
pub fn compute_metrics(bars: &[Bar], pivot_timeframe: Timeframe) -> Option<SymbolMetrics> {
    let last = bars.last()?;
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    let mut timeframes = BTreeMap::new();
    for tf in Timeframe::all() {
        let k = tf.bar_count();
        let tail = &bars[bars.len().saturating_sub(k)..];
        let Some(bar) = aggregate(tail, k) else {
            continue;
        };
        let price_change = bar.price_change_pct();

        // Simple 1:1 ratio against the previous same-length window
        let volume_ratio = if bars.len() >= 2 * k {
            let previous = &bars[bars.len() - 2 * k..bars.len() - k];
            let previous_volume: f64 = previous.iter().map(|b| b.volume).sum();
            (previous_volume > 0.0).then(|| bar.volume / previous_volume)
        } else {
            None
        };

        timeframes.insert(
            tf,
            TimeframeSnapshot {
                bar,
                price_change,
                volume_ratio,
            },
        );
    }

    let macd = indicators::macd(&closes);
    let bollinger = indicators::bollinger(&closes, BOLLINGER_PERIOD, BOLLINGER_WIDTH);
    let fib = previous_pivot_window(bars, pivot_timeframe)
        .map(|(high, low, close)| indicators::fibonacci_pivots(high, low, close));

    Some(SymbolMetrics {
        symbol: last.symbol.clone(),
        timestamp: last.close_time,
        last_price: last.close,
        timeframes,
        vcp: indicators::vcp(bars),
        rsi: indicators::rsi(&closes, RSI_PERIOD),
        macd_line: macd.map(|m| m.line),
        macd_signal: macd.and_then(|m| m.signal),
        bb_upper: bollinger.map(|b| b.upper),
        bb_middle: bollinger.map(|b| b.middle),
        bb_lower: bollinger.map(|b| b.lower),
        fib,
    })
}

/// High/low/close of the previous completed calendar-aligned period at the
/// pivot timeframe, e.g. the last full clock hour.
fn previous_pivot_window(bars: &[Bar], tf: Timeframe) -> Option<(f64, f64, f64)> {
    let last = bars.last()?;
    let period = tf.to_seconds();
    let now = last.close_time.timestamp();
    let current_start = now - now.rem_euclid(period);
    let previous_start = current_start - period;

    let mut high = f64::MIN;
    let mut low = f64::MAX;
    let mut close = None;
    for bar in bars {
        let t = bar.open_time.timestamp();
        if t >= previous_start && t < current_start {
            high = high.max(bar.high);
            low = low.min(bar.low);
            close = Some(bar.close);
        }
    }
    close.map(|close| (high, low, close))
}

pub struct MetricsEngine {
    bus: Arc<StreamBus>,
    candle_writer: Option<BatchWriter<CandleRow>>,
    metrics_writer: BatchWriter<MetricsRow>,
    metrics: Metrics,
    config: EngineConfig,
}

impl MetricsEngine {
    pub fn new(
        bus: Arc<StreamBus>,
        candle_writer: Option<BatchWriter<CandleRow>>,
        metrics_writer: BatchWriter<MetricsRow>,
        metrics: Metrics,
        config: EngineConfig,
    ) -> Self {
        Self {
            bus,
            candle_writer,
            metrics_writer,
            metrics,
            config,
        }
    }

    fn shard_for(symbol: &str, shards: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        symbol.hash(&mut hasher);
        (hasher.finish() % shards as u64) as usize
    }

    /// Consume `BARS`, routing each bar to its symbol's shard.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut subscription = self
            .bus
            .subscribe(
                BARS_STREAM,
                ConsumerKind::Ephemeral {
                    deliver: DeliverPolicy::New,
                },
            )
            .context("metrics engine failed to subscribe to bars")?;

        let shard_count = self.config.shards;
        let mut senders = Vec::with_capacity(shard_count);
        let mut shard_tasks = Vec::with_capacity(shard_count);
        for shard_id in 0..shard_count {
            let (tx, rx) = mpsc::channel::<Bar>(256);
            senders.push(tx);
            let shard = EngineShard {
                shard_id,
                windows: HashMap::new(),
                bus: Arc::clone(&self.bus),
                candle_writer: self.candle_writer.clone(),
                metrics_writer: self.metrics_writer.clone(),
                metrics: self.metrics.clone(),
                config: self.config.clone(),
            };
            shard_tasks.push(tokio::spawn(shard.run(rx)));
        }

        info!("MetricsEngine: running with {} shards", shard_count);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                delivery = subscription.next() => {
                    match serde_json::from_slice::<Bar>(delivery.payload()) {
                        Ok(bar) => {
                            let shard = Self::shard_for(&bar.symbol, shard_count);
                            if senders[shard].send(bar).await.is_err() {
                                warn!("MetricsEngine: shard {} is gone, stopping", shard);
                                break;
                            }
                            delivery.ack();
                        }
                        Err(e) => {
                            warn!(
                                "MetricsEngine: unparseable bar on {}: {}",
                                delivery.subject(),
                                e
                            );
                            delivery.ack();
                        }
                    }
                }
            }
        }

        drop(senders);
        for task in shard_tasks {
            let _ = task.await;
        }
        info!("MetricsEngine: stopped");
        Ok(())
    }
}

/// One worker of the engine pool; exclusively owns the windows of the
/// symbols hashed onto it.
struct EngineShard {
    shard_id: usize,
    windows: HashMap<String, SymbolWindow>,
    bus: Arc<StreamBus>,
    candle_writer: Option<BatchWriter<CandleRow>>,
    metrics_writer: BatchWriter<MetricsRow>,
    metrics: Metrics,
    config: EngineConfig,
}

impl EngineShard {
    async fn run(mut self, mut rx: mpsc::Receiver<Bar>) {
        while let Some(bar) = rx.recv().await {
            self.process_bar(bar);
        }
        debug!("MetricsEngine shard {} drained", self.shard_id);
    }

    fn process_bar(&mut self, bar: Bar) {
        let window = self
            .windows
            .entry(bar.symbol.clone())
            .or_insert_with(|| SymbolWindow::new(WINDOW_CAPACITY));

        if !window.append(bar.clone()) {
            // At-least-once delivery replays are expected; drop quietly
            debug!(
                "MetricsEngine: stale or duplicate bar for {} at {}",
                bar.symbol, bar.close_time
            );
            return;
        }

        if self.config.persist_raw_candles
            && let Some(writer) = &self.candle_writer
        {
            writer.enqueue(CandleRow::from(&bar));
        }

        let snapshot = window.snapshot();
        let Some(metrics) = compute_metrics(&snapshot, self.config.pivot_timeframe) else {
            return;
        };

        match serde_json::to_vec(&metrics) {
            Ok(payload) => match self.bus.publish(METRICS_SUBJECT, payload) {
                Ok(_) => {
                    self.metrics.metrics_events_total.inc();
                    self.metrics
                        .bus_published_total
                        .with_label_values(&[METRICS_STREAM])
                        .inc();
                }
                Err(e) => {
                    warn!("MetricsEngine: metrics publish failed for {}: {}", bar.symbol, e);
                    self.metrics
                        .bus_publish_errors_total
                        .with_label_values(&[if e.is_retryable() { "transient" } else { "permanent" }])
                        .inc();
                }
            },
            Err(e) => {
                warn!("MetricsEngine: metrics serialization failed: {}", e);
            }
        }

        for row in MetricsRow::from_metrics(&metrics) {
            self.metrics_writer.enqueue(row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar_at(i: i64, close: f64, volume: f64) -> Bar {
        // Aligned so that i = 0 starts exactly on an hour boundary
        let open_time = Utc.timestamp_opt(1_704_067_200, 0).unwrap() + Duration::minutes(i);
        Bar {
            symbol: "BTCUSDT".to_string(),
            open_time,
            close_time: open_time + Duration::minutes(1),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume,
            quote_volume: close * volume,
            trade_count: 5,
            is_closed: true,
        }
    }

    fn bars(n: i64) -> Vec<Bar> {
        (0..n).map(|i| bar_at(i, 100.0 + i as f64 * 0.01, 10.0)).collect()
    }

    #[test]
    fn test_empty_window_yields_nothing() {
        assert!(compute_metrics(&[], Timeframe::OneHour).is_none());
    }

    #[test]
    fn test_last_price_and_timestamp_follow_trigger_bar() {
        let window = bars(10);
        let m = compute_metrics(&window, Timeframe::OneHour).unwrap();
        assert_eq!(m.last_price, window.last().unwrap().close);
        assert_eq!(m.timestamp, window.last().unwrap().close_time);
        assert_eq!(m.symbol, "BTCUSDT");
    }

    #[test]
    fn test_short_window_marks_long_timeframes_incomplete() {
        let window = bars(10);
        let m = compute_metrics(&window, Timeframe::OneHour).unwrap();

        let five = m.snapshot(Timeframe::FiveMin).unwrap();
        assert!(five.bar.complete);
        assert!(five.price_change.is_some());

        let hour = m.snapshot(Timeframe::OneHour).unwrap();
        assert!(!hour.bar.complete);
        assert!(hour.price_change.is_none());
        assert_eq!(m.bar_volume(Timeframe::OneHour), None);
    }

    #[test]
    fn test_volume_ratio_against_previous_window() {
        // 10 bars: previous 5m window volume 5x20, current 5x10
        let mut window: Vec<Bar> = (0..5).map(|i| bar_at(i, 100.0, 20.0)).collect();
        window.extend((5..10).map(|i| bar_at(i, 100.0, 10.0)));

        let m = compute_metrics(&window, Timeframe::OneHour).unwrap();
        let ratio = m.volume_ratio(Timeframe::FiveMin).unwrap();
        assert!((ratio - 0.5).abs() < 1e-9);

        // 15m has no previous full window in 10 bars
        assert!(m.volume_ratio(Timeframe::FifteenMin).is_none());
    }

    #[test]
    fn test_indicator_presence_tracks_history_depth() {
        let short = compute_metrics(&bars(10), Timeframe::OneHour).unwrap();
        assert!(short.rsi.is_none());
        assert!(short.macd_line.is_none());
        assert!(short.bb_middle.is_none());
        assert!(short.vcp.is_some());

        let deep = compute_metrics(&bars(40), Timeframe::OneHour).unwrap();
        assert!(deep.rsi.is_some());
        assert!(deep.macd_line.is_some());
        assert!(deep.macd_signal.is_some());
        assert!(deep.bb_middle.is_some());
    }

    #[test]
    fn test_pivots_need_a_completed_previous_period() {
        // 59 bars starting on the hour: the current hour is still open and
        // no previous hour exists in the window
        let m = compute_metrics(&bars(59), Timeframe::OneHour).unwrap();
        assert!(m.fib.is_none());

        // 130 bars: bars 0..60 form the completed previous hour once the
        // trigger sits in the second hour
        let m = compute_metrics(&bars(130), Timeframe::OneHour).unwrap();
        assert!(m.fib.is_some());
    }

    #[test]
    fn test_previous_pivot_window_extrema() {
        // The trigger bar at i=119 closes exactly on the 2h boundary, so the
        // previous completed hour is bars 60..120
        let window = bars(120);
        let m = compute_metrics(&window, Timeframe::OneHour).unwrap();
        let fib = m.fib.unwrap();

        let prev: Vec<&Bar> = window[60..120].iter().collect();
        let high = prev.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let low = prev.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        let close = prev.last().unwrap().close;
        let expected = indicators::fibonacci_pivots(high, low, close);
        assert_eq!(fib, expected);
    }

    #[test]
    fn test_shard_routing_is_stable() {
        let a = MetricsEngine::shard_for("BTCUSDT", 4);
        for _ in 0..10 {
            assert_eq!(MetricsEngine::shard_for("BTCUSDT", 4), a);
        }
        assert!(MetricsEngine::shard_for("ETHUSDT", 1) == 0);
    }
}
