//! Per-symbol kline WebSocket stream.
//!
//! One connection per symbol over `{ws_base}/{symbol}@kline_1m`. The
//! upstream pushes a partial update roughly every second; only updates with
//! the closed flag set leave this layer as validated bars.

use crate::domain::errors::BarValidationError;
use crate::domain::market::Bar;
use anyhow::{Context, Result};
use chrono::{Duration, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

/// Raw kline payload as delivered by the stream; numeric fields arrive as
/// strings and stay that way until validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawKline {
    #[serde(rename = "t")]
    pub open_time_ms: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "q")]
    pub quote_volume: String,
    #[serde(rename = "n")]
    pub trade_count: u64,
    #[serde(rename = "x")]
    pub is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "k")]
    kline: RawKline,
}

/// Parse one stream frame into its kline payload.
///
/// Non-kline frames (subscription acks, unknown events) yield `Ok(None)`.
pub fn parse_kline_event(text: &str) -> Result<Option<RawKline>> {
    if !text.contains("\"kline\"") {
        return Ok(None);
    }
    let event: KlineEvent =
        serde_json::from_str(text).context("Failed to parse kline event payload")?;
    if event.event_type != "kline" {
        return Ok(None);
    }
    Ok(Some(event.kline))
}

fn parse_price_field(field: &'static str, raw: &str) -> Result<f64, BarValidationError> {
    if raw.trim().is_empty() {
        return Err(BarValidationError::EmptyField { field });
    }
    raw.trim()
        .parse::<f64>()
        .map_err(|_| BarValidationError::NotNumeric {
            field,
            raw: raw.to_string(),
        })
}

/// Convert a raw kline into a validated internal bar.
///
/// The close time is pinned to `open_time + 1 minute`: the upstream reports
/// the last millisecond of the window and the pipeline keys on minute-aligned
/// instants.
pub fn bar_from_kline(raw: &RawKline) -> Result<Bar, BarValidationError> {
    let open_time = Utc
        .timestamp_millis_opt(raw.open_time_ms)
        .single()
        .ok_or(BarValidationError::InvertedTimes)?;

    let bar = Bar {
        symbol: raw.symbol.to_uppercase(),
        open_time,
        close_time: open_time + Duration::minutes(1),
        open: parse_price_field("open", &raw.open)?,
        high: parse_price_field("high", &raw.high)?,
        low: parse_price_field("low", &raw.low)?,
        close: parse_price_field("close", &raw.close)?,
        volume: parse_price_field("volume", &raw.volume)?,
        quote_volume: parse_price_field("quote_volume", &raw.quote_volume)?,
        trade_count: raw.trade_count,
        is_closed: raw.is_closed,
    };
    bar.validate()?;
    Ok(bar)
}

/// A live kline connection for one symbol
pub struct KlineConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    symbol: String,
}

impl KlineConnection {
    pub async fn connect(ws_base: &str, symbol: &str) -> Result<Self> {
        let url = url::Url::parse(&format!(
            "{}/{}@kline_1m",
            ws_base.trim_end_matches('/'),
            symbol.to_lowercase()
        ))
        .with_context(|| format!("Invalid kline stream URL for {}", symbol))?;
        debug!("KlineConnection: connecting {}", url);
        let (ws, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("Failed to connect kline stream for {}", symbol))?;
        Ok(Self {
            ws,
            symbol: symbol.to_string(),
        })
    }

    /// Next text frame, transparently answering pings.
    ///
    /// `Ok(None)` means the upstream closed the stream.
    pub async fn next_text(&mut self) -> Result<Option<String>> {
        while let Some(frame) = self.ws.next().await {
            match frame.context("kline stream read error")? {
                Message::Text(text) => return Ok(Some(text.to_string())),
                Message::Ping(payload) => {
                    self.ws
                        .send(Message::Pong(payload))
                        .await
                        .context("Failed to answer upstream ping")?;
                }
                Message::Close(frame) => {
                    debug!(
                        "KlineConnection[{}]: closed by upstream: {:?}",
                        self.symbol, frame
                    );
                    return Ok(None);
                }
                _ => {}
            }
        }
        Ok(None)
    }

    /// Best-effort close, used on shutdown
    pub async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}
