use crate::domain::market::{FibonacciPivots, SymbolMetrics, Timeframe, TimeframeBar, TimeframeSnapshot};
use crate::domain::repositories::MetricsSnapshotRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Reads back the freshest persisted metrics rows and reassembles one
/// snapshot per symbol. Feeds the rule engine's periodic tick so alerts can
/// fire on intra-minute extrema the per-close event path never sees.
pub struct PgMetricsSnapshotRepository {
    pool: PgPool,
    query_deadline: Duration,
}

impl PgMetricsSnapshotRepository {
    pub fn new(pool: PgPool, query_deadline: Duration) -> Self {
        Self {
            pool,
            query_deadline,
        }
    }
}

struct SnapshotRow {
    time: DateTime<Utc>,
    symbol: String,
    timeframe: Timeframe,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    price_change: Option<f64>,
    volume_ratio: Option<f64>,
    vcp: Option<f64>,
    rsi_14: Option<f64>,
    macd: Option<f64>,
    macd_signal: Option<f64>,
    bb_upper: Option<f64>,
    bb_middle: Option<f64>,
    bb_lower: Option<f64>,
    fib: Option<FibonacciPivots>,
}

fn assemble(rows: Vec<SnapshotRow>) -> Vec<SymbolMetrics> {
    let mut per_symbol: HashMap<String, Vec<SnapshotRow>> = HashMap::new();
    for row in rows {
        per_symbol.entry(row.symbol.clone()).or_default().push(row);
    }

    per_symbol
        .into_iter()
        .filter_map(|(symbol, mut rows)| {
            rows.sort_by_key(|r| r.timeframe);
            let timestamp = rows.iter().map(|r| r.time).max()?;

            // The shortest timeframe carries the freshest close and the
            // indicator scalars (they are written identically on every row).
            let head = rows.first()?;
            let last_price = head.close;
            let vcp = head.vcp;
            let rsi = head.rsi_14;
            let macd_line = head.macd;
            let macd_signal = head.macd_signal;
            let bb_upper = head.bb_upper;
            let bb_middle = head.bb_middle;
            let bb_lower = head.bb_lower;
            let fib = head.fib;

            let mut timeframes = BTreeMap::new();
            for row in rows {
                let close_time = row.time;
                let open_time = close_time - ChronoDuration::seconds(row.timeframe.to_seconds());
                timeframes.insert(
                    row.timeframe,
                    TimeframeSnapshot {
                        bar: TimeframeBar {
                            open_time,
                            close_time,
                            open: row.open,
                            high: row.high,
                            low: row.low,
                            close: row.close,
                            volume: row.volume,
                            // A stored change implies the window was complete
                            complete: row.price_change.is_some(),
                        },
                        price_change: row.price_change,
                        volume_ratio: row.volume_ratio,
                    },
                );
            }

            Some(SymbolMetrics {
                symbol,
                timestamp,
                last_price,
                timeframes,
                vcp,
                rsi,
                macd_line,
                macd_signal,
                bb_upper,
                bb_middle,
                bb_lower,
                fib,
            })
        })
        .collect()
}

#[async_trait]
impl MetricsSnapshotRepository for PgMetricsSnapshotRepository {
    async fn latest_snapshots(&self, window: Duration) -> Result<Vec<SymbolMetrics>> {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::minutes(5));

        let query = sqlx::query(
            r#"
            SELECT DISTINCT ON (symbol, timeframe)
                time, symbol, timeframe, open, high, low, close, volume,
                price_change, volume_ratio, vcp, rsi_14, macd, macd_signal,
                bb_upper, bb_middle, bb_lower,
                fib_r3, fib_r2, fib_r1, fib_pivot, fib_s1, fib_s2, fib_s3
            FROM metrics_calculated
            WHERE time > $1
            ORDER BY symbol, timeframe, time DESC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool);

        let rows = tokio::time::timeout(self.query_deadline, query)
            .await
            .context("latest metrics query deadline exceeded")?
            .context("Failed to query latest metrics")?;

        let mut parsed = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_tf: String = row.try_get("timeframe")?;
            let timeframe = match Timeframe::from_str(&raw_tf) {
                Ok(tf) => tf,
                Err(_) => {
                    warn!("Skipping metrics row with unknown timeframe '{}'", raw_tf);
                    continue;
                }
            };

            let fib = match (
                row.try_get::<Option<f64>, _>("fib_r3")?,
                row.try_get::<Option<f64>, _>("fib_r2")?,
                row.try_get::<Option<f64>, _>("fib_r1")?,
                row.try_get::<Option<f64>, _>("fib_pivot")?,
                row.try_get::<Option<f64>, _>("fib_s1")?,
                row.try_get::<Option<f64>, _>("fib_s2")?,
                row.try_get::<Option<f64>, _>("fib_s3")?,
            ) {
                (Some(r3), Some(r2), Some(r1), Some(pivot), Some(s1), Some(s2), Some(s3)) => {
                    Some(FibonacciPivots {
                        r3,
                        r2,
                        r1,
                        pivot,
                        s1,
                        s2,
                        s3,
                    })
                }
                _ => None,
            };

            parsed.push(SnapshotRow {
                time: row.try_get("time")?,
                symbol: row.try_get("symbol")?,
                timeframe,
                open: row.try_get("open")?,
                high: row.try_get("high")?,
                low: row.try_get("low")?,
                close: row.try_get("close")?,
                volume: row.try_get("volume")?,
                price_change: row.try_get("price_change")?,
                volume_ratio: row.try_get("volume_ratio")?,
                vcp: row.try_get("vcp")?,
                rsi_14: row.try_get("rsi_14")?,
                macd: row.try_get("macd")?,
                macd_signal: row.try_get("macd_signal")?,
                bb_upper: row.try_get("bb_upper")?,
                bb_middle: row.try_get("bb_middle")?,
                bb_lower: row.try_get("bb_lower")?,
                fib,
            });
        }

        Ok(assemble(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot_row(
        symbol: &str,
        timeframe: Timeframe,
        close: f64,
        price_change: Option<f64>,
        minute: i64,
    ) -> SnapshotRow {
        SnapshotRow {
            time: Utc.timestamp_opt(1_704_067_200 + minute * 60, 0).unwrap(),
            symbol: symbol.to_string(),
            timeframe,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 100.0,
            price_change,
            volume_ratio: Some(1.2),
            vcp: Some(0.3),
            rsi_14: Some(58.0),
            macd: None,
            macd_signal: None,
            bb_upper: None,
            bb_middle: None,
            bb_lower: None,
            fib: None,
        }
    }

    #[test]
    fn test_assemble_groups_by_symbol() {
        let rows = vec![
            snapshot_row("BTCUSDT", Timeframe::FiveMin, 42_000.0, Some(1.0), 2),
            snapshot_row("BTCUSDT", Timeframe::OneHour, 41_900.0, Some(2.0), 2),
            snapshot_row("ETHUSDT", Timeframe::FiveMin, 2_200.0, Some(-0.5), 1),
        ];

        let mut snapshots = assemble(rows);
        snapshots.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        assert_eq!(snapshots.len(), 2);

        let btc = &snapshots[0];
        assert_eq!(btc.symbol, "BTCUSDT");
        assert_eq!(btc.last_price, 42_000.0);
        assert_eq!(btc.change(Timeframe::FiveMin), Some(1.0));
        assert_eq!(btc.change(Timeframe::OneHour), Some(2.0));
        assert_eq!(btc.vcp, Some(0.3));
    }

    #[test]
    fn test_assemble_marks_incomplete_windows() {
        let rows = vec![snapshot_row("BTCUSDT", Timeframe::OneDay, 42_000.0, None, 0)];
        let snapshots = assemble(rows);
        assert_eq!(snapshots[0].bar_volume(Timeframe::OneDay), None);
        assert_eq!(snapshots[0].change(Timeframe::OneDay), None);
    }
}
