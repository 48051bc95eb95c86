use crate::domain::market::{Bar, TimeframeBar};

/// Fold a run of consecutive 1-minute bars into one higher-timeframe bar.
///
/// open = first open, close = last close, high/low = extrema, volume = sum.
/// When fewer than `requested` bars are supplied the fold still runs over the
/// available prefix but the result is marked incomplete. Returns `None` for
/// an empty slice.
pub fn aggregate(bars: &[Bar], requested: usize) -> Option<TimeframeBar> {
    let first = bars.first()?;
    let last = bars.last()?;

    let mut high = f64::MIN;
    let mut low = f64::MAX;
    let mut volume = 0.0;
    for bar in bars {
        high = high.max(bar.high);
        low = low.min(bar.low);
        volume += bar.volume;
    }

    Some(TimeframeBar {
        open_time: first.open_time,
        close_time: last.close_time,
        open: first.open,
        high,
        low,
        close: last.close,
        volume,
        complete: bars.len() >= requested,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        let open_time = Utc.timestamp_opt(1_704_067_200, 0).unwrap() + Duration::minutes(i);
        Bar {
            symbol: "BTCUSDT".to_string(),
            open_time,
            close_time: open_time + Duration::minutes(1),
            open,
            high,
            low,
            close,
            volume,
            quote_volume: volume * close,
            trade_count: 100,
            is_closed: true,
        }
    }

    #[test]
    fn test_aggregate_five_minute_bar() {
        let bars = vec![
            bar(0, 40000.0, 40100.0, 39900.0, 40050.0, 10.0),
            bar(1, 40050.0, 40200.0, 40000.0, 40150.0, 12.0),
            bar(2, 40150.0, 40250.0, 40100.0, 40200.0, 8.0),
            bar(3, 40200.0, 40300.0, 40150.0, 40250.0, 9.0),
            bar(4, 40250.0, 40400.0, 40200.0, 40350.0, 11.0),
        ];

        let tb = aggregate(&bars, 5).unwrap();
        assert_eq!(tb.open, 40000.0);
        assert_eq!(tb.close, 40350.0);
        assert_eq!(tb.high, 40400.0);
        assert_eq!(tb.low, 39900.0);
        assert_eq!(tb.volume, 50.0);
        assert!(tb.complete);
        assert_eq!(tb.open_time, bars[0].open_time);
        assert_eq!(tb.close_time, bars[4].close_time);
    }

    #[test]
    fn test_aggregate_insufficient_history_flagged() {
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.5, 1.0),
            bar(1, 100.5, 102.0, 100.0, 101.0, 2.0),
        ];
        let tb = aggregate(&bars, 5).unwrap();
        assert!(!tb.complete);
        assert_eq!(tb.open, 100.0);
        assert_eq!(tb.close, 101.0);
        assert_eq!(tb.volume, 3.0);
    }

    #[test]
    fn test_aggregate_empty_slice() {
        assert!(aggregate(&[], 5).is_none());
    }

    #[test]
    fn test_aggregate_single_bar_identity() {
        let b = bar(0, 100.0, 103.0, 98.0, 102.0, 7.0);
        let tb = aggregate(std::slice::from_ref(&b), 1).unwrap();
        assert_eq!(tb.open, b.open);
        assert_eq!(tb.high, b.high);
        assert_eq!(tb.low, b.low);
        assert_eq!(tb.close, b.close);
        assert_eq!(tb.volume, b.volume);
        assert!(tb.complete);
    }
}
