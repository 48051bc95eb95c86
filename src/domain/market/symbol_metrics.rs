use crate::domain::market::{Timeframe, TimeframeBar};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Classical pivot levels computed from the previous completed pivot-timeframe bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FibonacciPivots {
    pub r3: f64,
    pub r2: f64,
    pub r1: f64,
    pub pivot: f64,
    pub s1: f64,
    pub s2: f64,
    pub s3: f64,
}

/// One timeframe's view inside a metrics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeSnapshot {
    pub bar: TimeframeBar,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub price_change: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub volume_ratio: Option<f64>,
}

/// Per-symbol metrics snapshot emitted on each closed 1-minute bar.
///
/// `timestamp` is the close time of the triggering bar, minute-aligned.
/// Indicators that lack sufficient history are absent rather than zero;
/// rules referencing an absent value evaluate to false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolMetrics {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub last_price: f64,
    pub timeframes: BTreeMap<Timeframe, TimeframeSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vcp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rsi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub macd_line: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub macd_signal: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bb_upper: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bb_middle: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bb_lower: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fib: Option<FibonacciPivots>,
}

impl SymbolMetrics {
    pub fn snapshot(&self, tf: Timeframe) -> Option<&TimeframeSnapshot> {
        self.timeframes.get(&tf)
    }

    /// Signed percent change for a timeframe, absent under insufficient history
    pub fn change(&self, tf: Timeframe) -> Option<f64> {
        self.snapshot(tf).and_then(|s| s.price_change)
    }

    /// Volume ratio for a timeframe, absent under insufficient history
    pub fn volume_ratio(&self, tf: Timeframe) -> Option<f64> {
        self.snapshot(tf).and_then(|s| s.volume_ratio)
    }

    /// Aggregated bar volume for a timeframe.
    ///
    /// Only complete bars count: a partially filled window would understate
    /// volume and let threshold rules misfire.
    pub fn bar_volume(&self, tf: Timeframe) -> Option<f64> {
        self.snapshot(tf)
            .filter(|s| s.bar.complete)
            .map(|s| s.bar.volume)
    }
}
