use crate::domain::errors::BarValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_closed() -> bool {
    true
}

/// One closed 1-minute OHLCV bar for a single symbol.
///
/// Immutable once published downstream of ingestion. The wire payload on
/// `candles.1m.{SYMBOL}` carries every field except `is_closed`: published
/// bars are closed by contract, so the flag is re-established on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    #[serde(rename = "number_of_trades")]
    pub trade_count: u64,
    #[serde(skip_serializing, default = "default_closed")]
    pub is_closed: bool,
}

impl Bar {
    /// Enforce the bar invariants: positive prices, non-negative volumes,
    /// `low <= min(open, close) <= max(open, close) <= high`, ordered times.
    pub fn validate(&self) -> Result<(), BarValidationError> {
        if self.symbol.is_empty() {
            return Err(BarValidationError::MissingSymbol);
        }

        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() {
                return Err(BarValidationError::NotNumeric {
                    field,
                    raw: value.to_string(),
                });
            }
            if value <= 0.0 {
                return Err(BarValidationError::NonPositive { field, value });
            }
        }

        for (field, value) in [("volume", self.volume), ("quote_volume", self.quote_volume)] {
            if !value.is_finite() {
                return Err(BarValidationError::NotNumeric {
                    field,
                    raw: value.to_string(),
                });
            }
            if value < 0.0 {
                return Err(BarValidationError::Negative { field, value });
            }
        }

        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        if self.low > body_low || body_high > self.high {
            return Err(BarValidationError::RangeViolation {
                symbol: self.symbol.clone(),
                open: self.open,
                high: self.high,
                low: self.low,
                close: self.close,
            });
        }

        if self.close_time <= self.open_time {
            return Err(BarValidationError::InvertedTimes);
        }

        Ok(())
    }
}
