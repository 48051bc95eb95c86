//! Rule engine: metrics snapshots in, alerts out.
//!
//! Two triggering paths share one evaluator: the durable `alert-engine`
//! consumer over `METRICS`, and a periodic tick that re-evaluates the
//! freshest stored metrics so intra-minute spikes the bar close reverses
//! still fire. Repeats are suppressed by a TTL cache keyed on
//! `alert:{symbol}:{rule_type}:{minute}`.

use crate::config::AlertConfig;
use crate::domain::alerts::{Alert, AlertRule, RuleType};
use crate::domain::market::SymbolMetrics;
use crate::domain::repositories::MetricsSnapshotRepository;
use crate::infrastructure::bus::{
    ALERT_SUBJECT, ALERTS_STREAM, ConsumerKind, DeliverPolicy, METRICS_STREAM, StreamBus,
};
use crate::infrastructure::notify::WebhookDispatcher;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::persistence::{AlertRow, BatchWriter};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const DURABLE_CONSUMER: &str = "alert-engine";

pub struct RuleEngine {
    catalogue: HashMap<RuleType, AlertRule>,
    dedup: moka::sync::Cache<String, ()>,
    bus: Arc<StreamBus>,
    alert_writer: BatchWriter<AlertRow>,
    dispatcher: Arc<WebhookDispatcher>,
    metrics: Metrics,
    config: AlertConfig,
}

fn dedup_key(symbol: &str, rule_type: RuleType, timestamp: DateTime<Utc>) -> String {
    let minute = timestamp.timestamp() / 60;
    format!("alert:{}:{}:{}", symbol, rule_type, minute)
}

impl RuleEngine {
    pub fn new(
        rules: Vec<AlertRule>,
        bus: Arc<StreamBus>,
        alert_writer: BatchWriter<AlertRow>,
        dispatcher: Arc<WebhookDispatcher>,
        metrics: Metrics,
        config: AlertConfig,
    ) -> Self {
        let catalogue: HashMap<RuleType, AlertRule> = rules
            .into_iter()
            .map(|rule| (rule.rule_type, rule))
            .collect();
        info!(
            "RuleEngine: catalogue loaded with {} rules ({} enabled)",
            catalogue.len(),
            catalogue.values().filter(|r| r.enabled).count()
        );

        let dedup = moka::sync::Cache::builder()
            .max_capacity(100_000)
            .time_to_live(config.dedup_ttl)
            .build();

        Self {
            catalogue,
            dedup,
            bus,
            alert_writer,
            dispatcher,
            metrics,
            config,
        }
    }

    /// Evaluate every enabled catalogue rule against one snapshot.
    ///
    /// Only rules present in the catalogue can ever produce an alert.
    pub fn evaluate_snapshot(&self, snapshot: &SymbolMetrics) -> Vec<Alert> {
        let mut alerts = Vec::new();
        for rule in self.catalogue.values() {
            if !rule.enabled || !rule.rule_type.evaluate(snapshot) {
                continue;
            }

            let key = dedup_key(&snapshot.symbol, rule.rule_type, snapshot.timestamp);
            if self.dedup.contains_key(&key) {
                self.metrics.alerts_deduplicated_total.inc();
                debug!(
                    "RuleEngine: suppressed repeat {} for {}",
                    rule.rule_type, snapshot.symbol
                );
                continue;
            }
            self.dedup.insert(key, ());

            alerts.push(Alert::from_match(rule, snapshot));
        }
        alerts
    }

    /// Persist, broadcast, notify. In that order: the alert must be durable
    /// and on the bus before outbound notifications go out.
    async fn deliver(&self, alert: Alert) {
        self.alert_writer.enqueue(AlertRow::from(&alert));

        match serde_json::to_vec(&alert) {
            Ok(payload) => match self.bus.publish(ALERT_SUBJECT, payload) {
                Ok(_) => {
                    self.metrics
                        .bus_published_total
                        .with_label_values(&[ALERTS_STREAM])
                        .inc();
                }
                Err(e) => {
                    warn!("RuleEngine: alert publish failed: {}", e);
                    self.metrics
                        .bus_publish_errors_total
                        .with_label_values(&[if e.is_retryable() { "transient" } else { "permanent" }])
                        .inc();
                }
            },
            Err(e) => warn!("RuleEngine: alert serialization failed: {}", e),
        }

        info!(
            "ALERT {} {} @ {} ({})",
            alert.symbol, alert.rule_type, alert.price, alert.id
        );
        self.metrics
            .alerts_triggered_total
            .with_label_values(&[alert.rule_type.as_str()])
            .inc();

        self.dispatcher.dispatch(&alert).await;
    }

    /// Event-driven path: durable consumer over `METRICS`
    pub async fn run_event_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut subscription = self
            .bus
            .subscribe(
                METRICS_STREAM,
                ConsumerKind::Durable {
                    name: DURABLE_CONSUMER.to_string(),
                    deliver: DeliverPolicy::All,
                },
            )
            .context("rule engine failed to subscribe to metrics")?;

        info!("RuleEngine: event loop started (durable consumer '{}')", DURABLE_CONSUMER);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                delivery = subscription.next() => {
                    match serde_json::from_slice::<SymbolMetrics>(delivery.payload()) {
                        Ok(snapshot) => {
                            for alert in self.evaluate_snapshot(&snapshot) {
                                self.deliver(alert).await;
                            }
                        }
                        Err(e) => {
                            warn!("RuleEngine: unparseable metrics event: {}", e);
                        }
                    }
                    delivery.ack();
                }
            }
        }

        info!("RuleEngine: event loop stopped");
        Ok(())
    }

    /// Periodic path: re-evaluate the freshest stored metrics every tick
    pub async fn run_poll_loop(
        self: Arc<Self>,
        repository: Arc<dyn MetricsSnapshotRepository>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            "RuleEngine: poll loop started (every {:?})",
            self.config.poll_interval
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    match repository.latest_snapshots(self.config.poll_window).await {
                        Ok(snapshots) => {
                            for snapshot in snapshots {
                                for alert in self.evaluate_snapshot(&snapshot) {
                                    self.deliver(alert).await;
                                }
                            }
                        }
                        Err(e) => {
                            // Transient store trouble; the next tick retries
                            warn!("RuleEngine: poll query failed: {}", e);
                        }
                    }
                }
            }
        }

        info!("RuleEngine: poll loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alerts::Criteria;
    use crate::domain::market::{Timeframe, TimeframeBar, TimeframeSnapshot};
    use crate::infrastructure::bus::StreamConfig;
    use crate::infrastructure::persistence::{BatchExecutor, BatchWriterConfig};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct NullExecutor;

    #[async_trait]
    impl BatchExecutor<AlertRow> for NullExecutor {
        async fn execute(&self, _rows: &[AlertRow]) -> Result<()> {
            Ok(())
        }
    }

    fn engine(rules: Vec<AlertRule>) -> RuleEngine {
        let bus = Arc::new(StreamBus::new());
        bus.add_stream(StreamConfig::new(ALERTS_STREAM, &[ALERT_SUBJECT]))
            .unwrap();
        let metrics = Metrics::new().unwrap();
        let config = AlertConfig {
            poll_interval: Duration::from_secs(5),
            poll_window: Duration::from_secs(300),
            dedup_ttl: Duration::from_secs(60),
            webhook_urls: vec![],
            webhook_timeout: Duration::from_secs(10),
            settings_refresh: Duration::from_secs(60),
        };
        let writer = BatchWriter::new(
            Arc::new(NullExecutor),
            BatchWriterConfig::default(),
            metrics.clone(),
        );
        let dispatcher = Arc::new(WebhookDispatcher::new(&config, metrics.clone()));
        RuleEngine::new(rules, bus, writer, dispatcher, metrics, config)
    }

    fn rule(rule_type: RuleType, enabled: bool) -> AlertRule {
        AlertRule {
            rule_type,
            description: rule_type.default_description().to_string(),
            criteria: Criteria::default(),
            enabled,
        }
    }

    fn pioneer_bull_snapshot(minute: i64) -> SymbolMetrics {
        let mut timeframes = BTreeMap::new();
        for (tf, change, volume) in [
            (Timeframe::FiveMin, 1.1, 20.0),
            (Timeframe::FifteenMin, 1.2, 15.0),
        ] {
            timeframes.insert(
                tf,
                TimeframeSnapshot {
                    bar: TimeframeBar {
                        open_time: Utc.timestamp_opt(1_704_067_200 + minute * 60, 0).unwrap(),
                        close_time: Utc.timestamp_opt(1_704_067_260 + minute * 60, 0).unwrap(),
                        open: 100.0,
                        high: 102.0,
                        low: 99.0,
                        close: 101.1,
                        volume,
                        complete: true,
                    },
                    price_change: Some(change),
                    volume_ratio: None,
                },
            );
        }
        SymbolMetrics {
            symbol: "BTCUSDT".to_string(),
            timestamp: Utc.timestamp_opt(1_704_067_260 + minute * 60, 0).unwrap(),
            last_price: 101.1,
            timeframes,
            vcp: Some(0.2),
            rsi: None,
            macd_line: None,
            macd_signal: None,
            bb_upper: None,
            bb_middle: None,
            bb_lower: None,
            fib: None,
        }
    }

    #[test]
    fn test_matching_rule_produces_one_alert() {
        let engine = engine(vec![rule(RuleType::PioneerBull, true)]);
        let alerts = engine.evaluate_snapshot(&pioneer_bull_snapshot(0));
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.rule_type, RuleType::PioneerBull);
        assert_eq!(alert.price, 101.1);
        assert_eq!(alert.metadata_f64("price_change_5m"), Some(1.1));
        assert_eq!(alert.metadata_f64("volume_15m"), Some(15.0));
    }

    #[test]
    fn test_rule_absent_from_catalogue_never_fires() {
        // The snapshot satisfies pioneer bull, but the catalogue only holds
        // the bear variant
        let engine = engine(vec![rule(RuleType::PioneerBear, true)]);
        assert!(engine.evaluate_snapshot(&pioneer_bull_snapshot(0)).is_empty());
    }

    #[test]
    fn test_disabled_rule_skipped() {
        let engine = engine(vec![rule(RuleType::PioneerBull, false)]);
        assert!(engine.evaluate_snapshot(&pioneer_bull_snapshot(0)).is_empty());
    }

    #[test]
    fn test_same_minute_repeat_suppressed() {
        let engine = engine(vec![rule(RuleType::PioneerBull, true)]);
        assert_eq!(engine.evaluate_snapshot(&pioneer_bull_snapshot(0)).len(), 1);
        // Same symbol, rule and minute: the poll path replaying the event
        assert!(engine.evaluate_snapshot(&pioneer_bull_snapshot(0)).is_empty());
        assert_eq!(
            engine.metrics.family_total("screener_alerts_deduplicated_total"),
            1.0
        );
    }

    #[test]
    fn test_next_minute_fires_again() {
        let engine = engine(vec![rule(RuleType::PioneerBull, true)]);
        assert_eq!(engine.evaluate_snapshot(&pioneer_bull_snapshot(0)).len(), 1);
        assert_eq!(engine.evaluate_snapshot(&pioneer_bull_snapshot(1)).len(), 1);
    }

    #[test]
    fn test_dedup_is_per_symbol() {
        let engine = engine(vec![rule(RuleType::PioneerBull, true)]);
        assert_eq!(engine.evaluate_snapshot(&pioneer_bull_snapshot(0)).len(), 1);

        let mut other = pioneer_bull_snapshot(0);
        other.symbol = "ETHUSDT".to_string();
        assert_eq!(engine.evaluate_snapshot(&other).len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_publishes_to_alert_stream() {
        let engine = engine(vec![rule(RuleType::PioneerBull, true)]);
        let alerts = engine.evaluate_snapshot(&pioneer_bull_snapshot(0));
        for alert in alerts {
            engine.deliver(alert).await;
        }
        assert_eq!(engine.bus.retained_count(ALERTS_STREAM).unwrap(), 1);
        assert_eq!(
            engine.metrics.family_total("screener_alerts_triggered_total"),
            1.0
        );
    }
}
