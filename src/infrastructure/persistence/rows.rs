//! Row shapes for the time-series store and their transactional upsert
//! executors. Display floats are rounded to 3 decimals here, at the
//! persistence boundary, and nowhere upstream.

use crate::domain::alerts::Alert;
use crate::domain::market::{Bar, SymbolMetrics, Timeframe};
use crate::infrastructure::persistence::batch_writer::{BatchExecutor, PersistRow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;

/// Round at the persistence boundary (3 decimals, customary for display)
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn round3_opt(value: Option<f64>) -> Option<f64> {
    value.map(round3)
}

/// One raw 1-minute bar headed for `candles_1m`
#[derive(Debug, Clone, PartialEq)]
pub struct CandleRow {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trades: i64,
}

impl From<&Bar> for CandleRow {
    fn from(bar: &Bar) -> Self {
        Self {
            time: bar.close_time,
            symbol: bar.symbol.clone(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            quote_volume: bar.quote_volume,
            trades: bar.trade_count as i64,
        }
    }
}

impl PersistRow for CandleRow {
    fn table() -> &'static str {
        "candles_1m"
    }
}

/// One (symbol, timeframe) derivation headed for `metrics_calculated`
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsRow {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub timeframe: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub price_change: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub vcp: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub fib_r3: Option<f64>,
    pub fib_r2: Option<f64>,
    pub fib_r1: Option<f64>,
    pub fib_pivot: Option<f64>,
    pub fib_s1: Option<f64>,
    pub fib_s2: Option<f64>,
    pub fib_s3: Option<f64>,
}

impl MetricsRow {
    /// One row per timeframe out of a metrics snapshot
    pub fn from_metrics(metrics: &SymbolMetrics) -> Vec<MetricsRow> {
        Timeframe::all()
            .iter()
            .filter_map(|tf| {
                let snapshot = metrics.snapshot(*tf)?;
                Some(MetricsRow {
                    time: metrics.timestamp,
                    symbol: metrics.symbol.clone(),
                    timeframe: tf.to_string(),
                    open: snapshot.bar.open,
                    high: snapshot.bar.high,
                    low: snapshot.bar.low,
                    close: snapshot.bar.close,
                    volume: round3(snapshot.bar.volume),
                    price_change: round3_opt(snapshot.price_change),
                    volume_ratio: round3_opt(snapshot.volume_ratio),
                    vcp: round3_opt(metrics.vcp),
                    rsi_14: round3_opt(metrics.rsi),
                    macd: round3_opt(metrics.macd_line),
                    macd_signal: round3_opt(metrics.macd_signal),
                    bb_upper: round3_opt(metrics.bb_upper),
                    bb_middle: round3_opt(metrics.bb_middle),
                    bb_lower: round3_opt(metrics.bb_lower),
                    fib_r3: metrics.fib.map(|f| round3(f.r3)),
                    fib_r2: metrics.fib.map(|f| round3(f.r2)),
                    fib_r1: metrics.fib.map(|f| round3(f.r1)),
                    fib_pivot: metrics.fib.map(|f| round3(f.pivot)),
                    fib_s1: metrics.fib.map(|f| round3(f.s1)),
                    fib_s2: metrics.fib.map(|f| round3(f.s2)),
                    fib_s3: metrics.fib.map(|f| round3(f.s3)),
                })
            })
            .collect()
    }
}

impl PersistRow for MetricsRow {
    fn table() -> &'static str {
        "metrics_calculated"
    }
}

/// One fired alert headed for `alert_history`
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRow {
    pub time: DateTime<Utc>,
    pub symbol: String,
    pub rule_type: String,
    pub description: String,
    pub price: f64,
    pub metadata: serde_json::Value,
}

impl From<&Alert> for AlertRow {
    fn from(alert: &Alert) -> Self {
        Self {
            time: alert.timestamp,
            symbol: alert.symbol.clone(),
            rule_type: alert.rule_type.to_string(),
            description: alert.description.clone(),
            price: round3(alert.price),
            metadata: serde_json::Value::Object(alert.metadata.clone()),
        }
    }
}

impl PersistRow for AlertRow {
    fn table() -> &'static str {
        "alert_history"
    }
}

/// Upserts `candles_1m` rows in one transaction
pub struct PgCandleExecutor {
    pool: PgPool,
    deadline: Duration,
}

impl PgCandleExecutor {
    pub fn new(pool: PgPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }
}

#[async_trait]
impl BatchExecutor<CandleRow> for PgCandleExecutor {
    async fn execute(&self, rows: &[CandleRow]) -> Result<()> {
        let work = async {
            let mut tx = self.pool.begin().await.context("begin candle batch")?;
            for row in rows {
                sqlx::query(
                    r#"
                    INSERT INTO candles_1m
                        (time, symbol, open, high, low, close, volume, quote_volume, trades)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT (time, symbol) DO UPDATE SET
                        open = EXCLUDED.open,
                        high = EXCLUDED.high,
                        low = EXCLUDED.low,
                        close = EXCLUDED.close,
                        volume = EXCLUDED.volume,
                        quote_volume = EXCLUDED.quote_volume,
                        trades = EXCLUDED.trades
                    "#,
                )
                .bind(row.time)
                .bind(&row.symbol)
                .bind(row.open)
                .bind(row.high)
                .bind(row.low)
                .bind(row.close)
                .bind(row.volume)
                .bind(row.quote_volume)
                .bind(row.trades)
                .execute(&mut *tx)
                .await
                .context("upsert candle row")?;
            }
            tx.commit().await.context("commit candle batch")
        };

        tokio::time::timeout(self.deadline, work)
            .await
            .context("candle batch deadline exceeded")?
    }
}

/// Upserts `metrics_calculated` rows in one transaction
pub struct PgMetricsExecutor {
    pool: PgPool,
    deadline: Duration,
}

impl PgMetricsExecutor {
    pub fn new(pool: PgPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }
}

#[async_trait]
impl BatchExecutor<MetricsRow> for PgMetricsExecutor {
    async fn execute(&self, rows: &[MetricsRow]) -> Result<()> {
        let work = async {
            let mut tx = self.pool.begin().await.context("begin metrics batch")?;
            for row in rows {
                sqlx::query(
                    r#"
                    INSERT INTO metrics_calculated
                        (time, symbol, timeframe, open, high, low, close, volume,
                         price_change, volume_ratio, vcp, rsi_14, macd, macd_signal,
                         bb_upper, bb_middle, bb_lower,
                         fib_r3, fib_r2, fib_r1, fib_pivot, fib_s1, fib_s2, fib_s3)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                            $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
                    ON CONFLICT (time, symbol, timeframe) DO UPDATE SET
                        open = EXCLUDED.open,
                        high = EXCLUDED.high,
                        low = EXCLUDED.low,
                        close = EXCLUDED.close,
                        volume = EXCLUDED.volume,
                        price_change = EXCLUDED.price_change,
                        volume_ratio = EXCLUDED.volume_ratio,
                        vcp = EXCLUDED.vcp,
                        rsi_14 = EXCLUDED.rsi_14,
                        macd = EXCLUDED.macd,
                        macd_signal = EXCLUDED.macd_signal,
                        bb_upper = EXCLUDED.bb_upper,
                        bb_middle = EXCLUDED.bb_middle,
                        bb_lower = EXCLUDED.bb_lower,
                        fib_r3 = EXCLUDED.fib_r3,
                        fib_r2 = EXCLUDED.fib_r2,
                        fib_r1 = EXCLUDED.fib_r1,
                        fib_pivot = EXCLUDED.fib_pivot,
                        fib_s1 = EXCLUDED.fib_s1,
                        fib_s2 = EXCLUDED.fib_s2,
                        fib_s3 = EXCLUDED.fib_s3
                    "#,
                )
                .bind(row.time)
                .bind(&row.symbol)
                .bind(&row.timeframe)
                .bind(row.open)
                .bind(row.high)
                .bind(row.low)
                .bind(row.close)
                .bind(row.volume)
                .bind(row.price_change)
                .bind(row.volume_ratio)
                .bind(row.vcp)
                .bind(row.rsi_14)
                .bind(row.macd)
                .bind(row.macd_signal)
                .bind(row.bb_upper)
                .bind(row.bb_middle)
                .bind(row.bb_lower)
                .bind(row.fib_r3)
                .bind(row.fib_r2)
                .bind(row.fib_r1)
                .bind(row.fib_pivot)
                .bind(row.fib_s1)
                .bind(row.fib_s2)
                .bind(row.fib_s3)
                .execute(&mut *tx)
                .await
                .context("upsert metrics row")?;
            }
            tx.commit().await.context("commit metrics batch")
        };

        tokio::time::timeout(self.deadline, work)
            .await
            .context("metrics batch deadline exceeded")?
    }
}

/// Upserts `alert_history` rows in one transaction
pub struct PgAlertExecutor {
    pool: PgPool,
    deadline: Duration,
}

impl PgAlertExecutor {
    pub fn new(pool: PgPool, deadline: Duration) -> Self {
        Self { pool, deadline }
    }
}

#[async_trait]
impl BatchExecutor<AlertRow> for PgAlertExecutor {
    async fn execute(&self, rows: &[AlertRow]) -> Result<()> {
        let work = async {
            let mut tx = self.pool.begin().await.context("begin alert batch")?;
            for row in rows {
                sqlx::query(
                    r#"
                    INSERT INTO alert_history
                        (time, symbol, rule_type, description, price, metadata)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (time, symbol, rule_type) DO UPDATE SET
                        description = EXCLUDED.description,
                        price = EXCLUDED.price,
                        metadata = EXCLUDED.metadata
                    "#,
                )
                .bind(row.time)
                .bind(&row.symbol)
                .bind(&row.rule_type)
                .bind(&row.description)
                .bind(row.price)
                .bind(&row.metadata)
                .execute(&mut *tx)
                .await
                .context("upsert alert row")?;
            }
            tx.commit().await.context("commit alert batch")
        };

        tokio::time::timeout(self.deadline, work)
            .await
            .context("alert batch deadline exceeded")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alerts::{AlertRule, Criteria, RuleType};
    use crate::domain::market::{TimeframeBar, TimeframeSnapshot};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    #[test]
    fn test_round3() {
        assert_eq!(round3(1.23456), 1.235);
        assert_eq!(round3(-0.0004), -0.0);
        assert_eq!(round3(2.0), 2.0);
    }

    #[test]
    fn test_candle_row_keyed_on_close_time() {
        let bar = Bar {
            symbol: "BTCUSDT".to_string(),
            open_time: Utc.timestamp_opt(1_704_067_200, 0).unwrap(),
            close_time: Utc.timestamp_opt(1_704_067_260, 0).unwrap(),
            open: 42000.0,
            high: 42100.0,
            low: 41900.0,
            close: 42050.0,
            volume: 12.5,
            quote_volume: 525_000.0,
            trade_count: 340,
            is_closed: true,
        };
        let row = CandleRow::from(&bar);
        assert_eq!(row.time, bar.close_time);
        assert_eq!(row.trades, 340);
    }

    #[test]
    fn test_metrics_rows_one_per_timeframe() {
        let mut timeframes = BTreeMap::new();
        for tf in Timeframe::all() {
            timeframes.insert(
                tf,
                TimeframeSnapshot {
                    bar: TimeframeBar {
                        open_time: Utc.timestamp_opt(1_704_067_200, 0).unwrap(),
                        close_time: Utc.timestamp_opt(1_704_067_260, 0).unwrap(),
                        open: 100.0,
                        high: 101.0,
                        low: 99.0,
                        close: 100.5,
                        volume: 10.123456,
                        complete: true,
                    },
                    price_change: Some(0.512345),
                    volume_ratio: None,
                },
            );
        }
        let metrics = SymbolMetrics {
            symbol: "BTCUSDT".to_string(),
            timestamp: Utc.timestamp_opt(1_704_067_260, 0).unwrap(),
            last_price: 100.5,
            timeframes,
            vcp: Some(0.123456),
            rsi: Some(55.5),
            macd_line: None,
            macd_signal: None,
            bb_upper: None,
            bb_middle: None,
            bb_lower: None,
            fib: None,
        };

        let rows = MetricsRow::from_metrics(&metrics);
        assert_eq!(rows.len(), 6);
        assert!(rows.iter().any(|r| r.timeframe == "8h"));
        // Rounded at the boundary
        assert_eq!(rows[0].price_change, Some(0.512));
        assert_eq!(rows[0].vcp, Some(0.123));
        assert_eq!(rows[0].volume, 10.123);
    }

    #[test]
    fn test_alert_row_carries_metadata_json() {
        let rule = AlertRule {
            rule_type: RuleType::PioneerBull,
            description: "desc".to_string(),
            criteria: Criteria::default(),
            enabled: true,
        };
        let mut timeframes = BTreeMap::new();
        timeframes.insert(
            Timeframe::FiveMin,
            TimeframeSnapshot {
                bar: TimeframeBar {
                    open_time: Utc.timestamp_opt(1_704_067_200, 0).unwrap(),
                    close_time: Utc.timestamp_opt(1_704_067_260, 0).unwrap(),
                    open: 100.0,
                    high: 101.5,
                    low: 99.5,
                    close: 101.1,
                    volume: 20.0,
                    complete: true,
                },
                price_change: Some(1.1),
                volume_ratio: None,
            },
        );
        let metrics = SymbolMetrics {
            symbol: "SOLUSDT".to_string(),
            timestamp: Utc.timestamp_opt(1_704_067_260, 0).unwrap(),
            last_price: 101.1,
            timeframes,
            vcp: None,
            rsi: None,
            macd_line: None,
            macd_signal: None,
            bb_upper: None,
            bb_middle: None,
            bb_lower: None,
            fib: None,
        };
        let alert = Alert::from_match(&rule, &metrics);
        let row = AlertRow::from(&alert);
        assert_eq!(row.rule_type, "futures_pioneer_bull");
        assert_eq!(row.metadata["price_change_5m"], 1.1);
    }
}
