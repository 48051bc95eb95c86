use crate::domain::alerts::{AlertRule, RuleType};
use crate::domain::market::{SymbolMetrics, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// A rule match, broadcast on `alerts.triggered` and persisted to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub symbol: String,
    pub rule_type: RuleType,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub metadata: Map<String, Value>,
}

impl Alert {
    /// Build an alert from a matched rule and the snapshot that satisfied it.
    ///
    /// Metadata carries every available per-timeframe change and volume plus
    /// the VCP reading, so a consumer can reconstruct why the rule fired.
    pub fn from_match(rule: &AlertRule, metrics: &SymbolMetrics) -> Self {
        let mut metadata = Map::new();
        for tf in Timeframe::all() {
            if let Some(change) = metrics.change(tf) {
                metadata.insert(format!("price_change_{}", tf), json_num(change));
            }
            if let Some(volume) = metrics.bar_volume(tf) {
                metadata.insert(format!("volume_{}", tf), json_num(volume));
            }
            if let Some(ratio) = metrics.volume_ratio(tf) {
                metadata.insert(format!("volume_ratio_{}", tf), json_num(ratio));
            }
        }
        if let Some(vcp) = metrics.vcp {
            metadata.insert("vcp".to_string(), json_num(vcp));
        }

        Alert {
            id: Uuid::new_v4(),
            symbol: metrics.symbol.clone(),
            rule_type: rule.rule_type,
            description: rule.description.clone(),
            timestamp: metrics.timestamp,
            price: metrics.last_price,
            metadata,
        }
    }

    /// Metadata lookup as a float, used by the notification layer
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }
}

fn json_num(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
