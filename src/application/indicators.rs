//! Technical indicator kernel.
//!
//! Pure functions over ordered bar/close slices. Every function returns
//! `None` below its minimum sample count; absence propagates into the
//! metrics snapshot instead of a zero that downstream rules could misread.
//! All arithmetic is IEEE-754 double precision; rounding happens only at
//! the persistence boundary.

use crate::domain::market::{Bar, FibonacciPivots};
use statrs::statistics::Statistics;

pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_WIDTH: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Volatility contraction reading over a bar window.
///
/// `(P / WA) * (((C - L) - (H - C)) / (H - L))` where `P` and `C` are the
/// latest close, `WA` the volume-weighted average close, and `H`/`L` the
/// window extrema. Undefined for a flat window (`H == L`) or zero volume.
pub fn vcp(bars: &[Bar]) -> Option<f64> {
    let last = bars.last()?;

    let mut high = f64::MIN;
    let mut low = f64::MAX;
    let mut weighted = 0.0;
    let mut total_volume = 0.0;
    for bar in bars {
        high = high.max(bar.high);
        low = low.min(bar.low);
        weighted += bar.close * bar.volume;
        total_volume += bar.volume;
    }

    if high == low || total_volume <= 0.0 {
        return None;
    }

    let weighted_avg = weighted / total_volume;
    let close = last.close;
    let balance = ((close - low) - (high - close)) / (high - low);
    Some(close / weighted_avg * balance)
}

/// Wilder RSI over the last `period + 1` closes
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let window = &closes[closes.len() - (period + 1)..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// EMA series seeded with the SMA of the first `period` values.
///
/// The returned vector's element `j` corresponds to input index
/// `j + period - 1`; empty when the input is shorter than `period`.
fn ema_series(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut series = Vec::with_capacity(values.len() - period + 1);
    let mut ema = values[..period].iter().sum::<f64>() / period as f64;
    series.push(ema);
    for &value in &values[period..] {
        ema = alpha * value + (1.0 - alpha) * ema;
        series.push(ema);
    }
    series
}

/// Latest EMA value, `None` below `period` samples
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied()
}

/// MACD(12, 26, 9): line = EMA(12) - EMA(26), signal = EMA(9) of the line.
///
/// The line needs 26 closes; the signal another 9 line values (34 closes).
pub fn macd(closes: &[f64]) -> Option<Macd> {
    if closes.len() < MACD_SLOW {
        return None;
    }

    let fast = ema_series(closes, MACD_FAST);
    let slow = ema_series(closes, MACD_SLOW);

    // Align both series on the close index: slow[j] sits at close index
    // j + MACD_SLOW - 1, which is fast index j + MACD_SLOW - MACD_FAST.
    let offset = MACD_SLOW - MACD_FAST;
    let line_series: Vec<f64> = slow
        .iter()
        .enumerate()
        .map(|(j, &s)| fast[j + offset] - s)
        .collect();

    let line = *line_series.last()?;
    let signal = ema(&line_series, MACD_SIGNAL);
    Some(Macd { line, signal })
}

/// Bollinger bands: SMA(period) ± width * population sigma(period)
pub fn bollinger(closes: &[f64], period: usize, width: f64) -> Option<Bollinger> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().mean();
    let sigma = window.iter().population_std_dev();
    Some(Bollinger {
        upper: middle + width * sigma,
        middle,
        lower: middle - width * sigma,
    })
}

/// Classical pivot ladder from the previous completed bar's high/low/close
pub fn fibonacci_pivots(high: f64, low: f64, close: f64) -> FibonacciPivots {
    let pivot = (high + low + close) / 3.0;
    FibonacciPivots {
        r3: high + 2.0 * (pivot - low),
        r2: pivot + (high - low),
        r1: 2.0 * pivot - low,
        pivot,
        s1: 2.0 * pivot - high,
        s2: pivot - (high - low),
        s3: low - 2.0 * (high - pivot),
    }
}
