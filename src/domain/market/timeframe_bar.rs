use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One higher-timeframe bar folded from the tail of a symbol's 1-minute window.
///
/// `complete` is false when fewer base bars were available than the timeframe
/// requires; such a bar is built from the available prefix and downstream
/// derivations (price change, volume ratio) are withheld.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeBar {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub complete: bool,
}

impl TimeframeBar {
    /// Signed percent change over the bar, absent for incomplete history
    pub fn price_change_pct(&self) -> Option<f64> {
        if !self.complete || self.open == 0.0 {
            return None;
        }
        Some((self.close - self.open) / self.open * 100.0)
    }
}
