//! Window behaviour at scale: wrap-around, aggregate identities and
//! indicator presence over a full day of bars.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use screener::application::agents::compute_metrics;
use screener::application::market_data::{SymbolWindow, WINDOW_CAPACITY, aggregate};
use screener::domain::market::{Bar, Timeframe};

fn bar_at(i: i64, close: f64, volume: f64) -> Bar {
    let open_time = Utc.timestamp_opt(1_704_067_200, 0).unwrap() + ChronoDuration::minutes(i);
    Bar {
        symbol: "BTCUSDT".to_string(),
        open_time,
        close_time: open_time + ChronoDuration::minutes(1),
        open: close,
        high: close + 2.0,
        low: close - 2.0,
        close,
        volume,
        quote_volume: close * volume,
        trade_count: 12,
        is_closed: true,
    }
}

#[test]
fn test_full_day_wrap_drops_only_the_oldest() {
    let window = SymbolWindow::new(WINDOW_CAPACITY);
    for i in 0..=1440 {
        assert!(window.append(bar_at(i, i as f64 + 1.0, 1.0)));
    }

    assert_eq!(window.len(), 1440);
    let tail = window.tail(1440);
    assert_eq!(tail[0].close, 2.0); // bar 0 evicted, bar 1 survives
    assert_eq!(window.tail(1)[0].close, 1441.0);
}

#[test]
fn test_aggregate_identities_over_every_timeframe() {
    let window = SymbolWindow::new(WINDOW_CAPACITY);
    for i in 0..1440 {
        window.append(bar_at(i, 1000.0 + (i % 97) as f64, 1.0 + (i % 7) as f64));
    }

    let snapshot = window.snapshot();
    for tf in Timeframe::all() {
        let n = tf.bar_count();
        let tail = window.tail(n);
        let tb = aggregate(&tail, n).unwrap();

        assert!(tb.complete, "{tf} should be complete over a full day");
        assert_eq!(tb.open, tail[0].open);
        assert_eq!(tb.close, tail[n - 1].close);
        assert_eq!(
            tb.high,
            tail.iter().map(|b| b.high).fold(f64::MIN, f64::max)
        );
        assert_eq!(tb.low, tail.iter().map(|b| b.low).fold(f64::MAX, f64::min));
        let volume_sum: f64 = tail.iter().map(|b| b.volume).sum();
        assert!((tb.volume - volume_sum).abs() < 1e-9);

        // The snapshot-level aggregate matches the direct tail fold
        let from_snapshot = aggregate(&snapshot[snapshot.len() - n..], n).unwrap();
        assert_eq!(from_snapshot, tb);
    }
}

#[test]
fn test_metrics_over_a_full_day() {
    let window = SymbolWindow::new(WINDOW_CAPACITY);
    for i in 0..1440 {
        window.append(bar_at(i, 1000.0 + (i % 31) as f64 * 0.5, 3.0));
    }

    let snapshot = window.snapshot();
    let metrics = compute_metrics(&snapshot, Timeframe::OneHour).unwrap();

    // last_price is the newest close
    assert_eq!(metrics.last_price, snapshot.last().unwrap().close);
    assert_eq!(metrics.timestamp, snapshot.last().unwrap().close_time);

    // Every timeframe is complete and carries a change
    for tf in Timeframe::all() {
        let tf_snapshot = metrics.snapshot(tf).unwrap();
        assert!(tf_snapshot.bar.complete);
        assert!(tf_snapshot.price_change.is_some());
    }

    // Only timeframes with a full previous window carry a volume ratio;
    // 1d needs 2880 bars of history and the window caps at 1440
    assert!(metrics.volume_ratio(Timeframe::FiveMin).is_some());
    assert!(metrics.volume_ratio(Timeframe::EightHour).is_some());
    assert!(metrics.volume_ratio(Timeframe::OneDay).is_none());

    // A full day satisfies every indicator's minimum sample count
    assert!(metrics.rsi.is_some());
    assert!(metrics.macd_line.is_some());
    assert!(metrics.macd_signal.is_some());
    assert!(metrics.bb_middle.is_some());
    assert!(metrics.vcp.is_some());
    assert!(metrics.fib.is_some());

    let rsi = metrics.rsi.unwrap();
    assert!((0.0..=100.0).contains(&rsi));

    let bb_upper = metrics.bb_upper.unwrap();
    let bb_lower = metrics.bb_lower.unwrap();
    assert!(bb_upper >= metrics.bb_middle.unwrap());
    assert!(bb_lower <= metrics.bb_middle.unwrap());
}

#[test]
fn test_volume_ratio_presence_boundary() {
    // Exactly 2 * 480 bars: the 8h ratio becomes available, 1d stays absent
    let window = SymbolWindow::new(WINDOW_CAPACITY);
    for i in 0..960 {
        window.append(bar_at(i, 1000.0, 2.0));
    }

    let metrics = compute_metrics(&window.snapshot(), Timeframe::OneHour).unwrap();
    let ratio = metrics.volume_ratio(Timeframe::EightHour).unwrap();
    assert!((ratio - 1.0).abs() < 1e-9);
    assert!(metrics.volume_ratio(Timeframe::OneDay).is_none());
}
