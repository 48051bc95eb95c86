//! Webhook fan-out for fired alerts.
//!
//! Stateless: every alert is POSTed as an embed-style JSON document to each
//! static sink plus the webhooks of users subscribed to the rule. Failures
//! are per-sink and counted, never retried; sinks needing reliability
//! subscribe to `alerts.triggered` on the bus instead.

use crate::config::AlertConfig;
use crate::domain::alerts::{Alert, RuleFamily, UserSettings};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use crate::infrastructure::observability::Metrics;
use serde_json::{Value, json};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

const COLOR_BULL: u32 = 0x2ECC71;
const COLOR_BEAR: u32 = 0xE74C3C;
const COLOR_NEUTRAL: u32 = 0x95A5A6;

pub struct WebhookDispatcher {
    client: reqwest::Client,
    static_sinks: Vec<String>,
    user_settings: RwLock<Vec<UserSettings>>,
    metrics: Metrics,
}

impl WebhookDispatcher {
    pub fn new(config: &AlertConfig, metrics: Metrics) -> Self {
        Self {
            client: HttpClientFactory::create_webhook_client(config.webhook_timeout),
            static_sinks: config.webhook_urls.clone(),
            user_settings: RwLock::new(Vec::new()),
            metrics,
        }
    }

    /// Swap in a freshly loaded user settings snapshot
    pub fn update_user_settings(&self, settings: Vec<UserSettings>) {
        let mut guard = self
            .user_settings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = settings;
    }

    /// Sink URLs for one alert: static sinks plus subscribed users
    fn sinks_for(&self, alert: &Alert) -> Vec<String> {
        let mut sinks = self.static_sinks.clone();
        let users = self
            .user_settings
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for user in users.iter() {
            if user.wants(alert.rule_type)
                && let Some(url) = &user.webhook_url
                && !sinks.contains(url)
            {
                sinks.push(url.clone());
            }
        }
        sinks
    }

    /// Embed-style notification document
    fn build_payload(alert: &Alert) -> Value {
        let color = match alert.rule_type.family() {
            RuleFamily::Bull => COLOR_BULL,
            RuleFamily::Bear => COLOR_BEAR,
            RuleFamily::Neutral => COLOR_NEUTRAL,
        };

        let mut fields = vec![
            json!({"name": "Symbol", "value": alert.symbol, "inline": true}),
            json!({"name": "Price", "value": format!("{:.4}", alert.price), "inline": true}),
        ];
        for (label, key) in [
            ("Change 5m", "price_change_5m"),
            ("Change 15m", "price_change_15m"),
            ("Change 1h", "price_change_1h"),
            ("Change 8h", "price_change_8h"),
        ] {
            if let Some(value) = alert.metadata_f64(key) {
                fields.push(json!({
                    "name": label,
                    "value": format!("{:+.2}%", value),
                    "inline": true
                }));
            }
        }
        if let Some(volume) = alert.metadata_f64("volume_1h") {
            fields.push(json!({
                "name": "Volume 1h",
                "value": format!("{:.0}", volume),
                "inline": true
            }));
        }
        if let Some(vcp) = alert.metadata_f64("vcp") {
            fields.push(json!({
                "name": "VCP",
                "value": format!("{:.3}", vcp),
                "inline": true
            }));
        }

        json!({
            "embeds": [{
                "title": format!("{} {} | {}", alert.rule_type.emoji(), alert.symbol, alert.description),
                "color": color,
                "fields": fields,
                "timestamp": alert.timestamp.to_rfc3339(),
            }]
        })
    }

    /// Post one alert to every sink. Per-sink failures never abort the rest.
    pub async fn dispatch(&self, alert: &Alert) {
        let sinks = self.sinks_for(alert);
        if sinks.is_empty() {
            return;
        }

        let payload = Self::build_payload(alert);
        let sends = sinks.iter().map(|url| {
            let client = self.client.clone();
            let payload = payload.clone();
            async move { (url, client.post(url).json(&payload).send().await) }
        });

        for (url, result) in futures::future::join_all(sends).await {
            match result {
                Ok(response) if response.status().is_success() => {
                    debug!("Webhook delivered to {}", url);
                    self.metrics
                        .webhook_deliveries_total
                        .with_label_values(&["success"])
                        .inc();
                }
                Ok(response) => {
                    warn!(
                        "Webhook sink {} answered {} for alert {}",
                        url,
                        response.status(),
                        alert.id
                    );
                    self.metrics
                        .webhook_deliveries_total
                        .with_label_values(&["rejected"])
                        .inc();
                }
                Err(e) => {
                    warn!("Webhook sink {} failed for alert {}: {}", url, alert.id, e);
                    self.metrics
                        .webhook_deliveries_total
                        .with_label_values(&["error"])
                        .inc();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alerts::{AlertRule, Criteria, RuleType};
    use crate::domain::market::{SymbolMetrics, Timeframe, TimeframeBar, TimeframeSnapshot};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn alert(rule_type: RuleType) -> Alert {
        let mut timeframes = BTreeMap::new();
        for (tf, change, volume) in [
            (Timeframe::FiveMin, 1.1, 20.0),
            (Timeframe::OneHour, 2.5, 1_500_000.0),
        ] {
            timeframes.insert(
                tf,
                TimeframeSnapshot {
                    bar: TimeframeBar {
                        open_time: Utc.timestamp_opt(1_704_067_200, 0).unwrap(),
                        close_time: Utc.timestamp_opt(1_704_067_260, 0).unwrap(),
                        open: 100.0,
                        high: 103.0,
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
        let metrics = SymbolMetrics {
            symbol: "BTCUSDT".to_string(),
            timestamp: Utc.timestamp_opt(1_704_067_260, 0).unwrap(),
            last_price: 101.1,
            timeframes,
            vcp: Some(0.4),
            rsi: None,
            macd_line: None,
            macd_signal: None,
            bb_upper: None,
            bb_middle: None,
            bb_lower: None,
            fib: None,
        };
        let rule = AlertRule {
            rule_type,
            description: rule_type.default_description().to_string(),
            criteria: Criteria::default(),
            enabled: true,
        };
        Alert::from_match(&rule, &metrics)
    }

    fn dispatcher(static_sinks: Vec<String>) -> WebhookDispatcher {
        let config = AlertConfig {
            poll_interval: Duration::from_secs(5),
            poll_window: Duration::from_secs(300),
            dedup_ttl: Duration::from_secs(60),
            webhook_urls: static_sinks,
            webhook_timeout: Duration::from_secs(10),
            settings_refresh: Duration::from_secs(60),
        };
        WebhookDispatcher::new(&config, Metrics::new().unwrap())
    }

    #[test]
    fn test_payload_colour_follows_family() {
        let bull = WebhookDispatcher::build_payload(&alert(RuleType::PioneerBull));
        assert_eq!(bull["embeds"][0]["color"], COLOR_BULL);

        let bear = WebhookDispatcher::build_payload(&alert(RuleType::TopHunter));
        assert_eq!(bear["embeds"][0]["color"], COLOR_BEAR);
    }

    #[test]
    fn test_payload_carries_core_fields() {
        let payload = WebhookDispatcher::build_payload(&alert(RuleType::PioneerBull));
        let fields = payload["embeds"][0]["fields"].as_array().unwrap();
        let names: Vec<&str> = fields.iter().map(|f| f["name"].as_str().unwrap()).collect();
        assert!(names.contains(&"Symbol"));
        assert!(names.contains(&"Price"));
        assert!(names.contains(&"Change 5m"));
        assert!(names.contains(&"Change 1h"));
        assert!(names.contains(&"Volume 1h"));
        assert!(names.contains(&"VCP"));

        let title = payload["embeds"][0]["title"].as_str().unwrap();
        assert!(title.contains("BTCUSDT"));
    }

    #[test]
    fn test_sinks_merge_static_and_subscribed_users() {
        let d = dispatcher(vec!["https://hooks.test/static".to_string()]);
        d.update_user_settings(vec![
            UserSettings {
                user_id: "u-1".to_string(),
                selected_alerts: vec![RuleType::PioneerBull],
                webhook_url: Some("https://hooks.test/u1".to_string()),
                notification_enabled: true,
            },
            UserSettings {
                user_id: "u-2".to_string(),
                selected_alerts: vec![RuleType::TopHunter],
                webhook_url: Some("https://hooks.test/u2".to_string()),
                notification_enabled: true,
            },
            UserSettings {
                user_id: "u-3".to_string(),
                selected_alerts: vec![RuleType::PioneerBull],
                webhook_url: Some("https://hooks.test/u3".to_string()),
                notification_enabled: false,
            },
        ]);

        let sinks = d.sinks_for(&alert(RuleType::PioneerBull));
        assert_eq!(
            sinks,
            vec![
                "https://hooks.test/static".to_string(),
                "https://hooks.test/u1".to_string(),
            ]
        );
    }

    #[test]
    fn test_duplicate_user_sink_not_doubled() {
        let d = dispatcher(vec!["https://hooks.test/shared".to_string()]);
        d.update_user_settings(vec![UserSettings {
            user_id: "u-1".to_string(),
            selected_alerts: vec![RuleType::PioneerBull],
            webhook_url: Some("https://hooks.test/shared".to_string()),
            notification_enabled: true,
        }]);
        assert_eq!(d.sinks_for(&alert(RuleType::PioneerBull)).len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_with_no_sinks_is_noop() {
        let d = dispatcher(vec![]);
        d.dispatch(&alert(RuleType::PioneerBull)).await;
        assert_eq!(
            d.metrics.family_total("screener_webhook_deliveries_total"),
            0.0
        );
    }
}
