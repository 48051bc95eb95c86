//! Binance USDT-margined futures REST client.
//!
//! Used once at startup to discover the tradable perpetual universe and rank
//! it by 24h quote volume. Transient failures are retried by the client
//! middleware; callers decide how often to re-attempt the whole discovery.

use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use anyhow::{Context, Result};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

pub struct FuturesMarketClient {
    client: ClientWithMiddleware,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
    #[serde(rename = "quoteAsset")]
    quote_asset: String,
    #[serde(rename = "contractType", default)]
    contract_type: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct Ticker24h {
    symbol: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
}

impl FuturesMarketClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url,
        }
    }

    /// Active USDT-margined perpetual contracts
    pub async fn perpetual_universe(&self) -> Result<Vec<String>> {
        let url = format!("{}/fapi/v1/exchangeInfo", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch exchangeInfo")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("exchangeInfo fetch failed: {}", error_text);
        }

        let info: ExchangeInfo = response
            .json()
            .await
            .context("Failed to parse exchangeInfo")?;

        let universe: Vec<String> = info
            .symbols
            .into_iter()
            .filter(|s| {
                s.status == "TRADING"
                    && s.quote_asset == "USDT"
                    && s.contract_type == "PERPETUAL"
            })
            .map(|s| s.symbol)
            .collect();

        info!(
            "FuturesMarketClient: {} active USDT perpetual contracts",
            universe.len()
        );
        Ok(universe)
    }

    /// 24h quote volume per symbol
    pub async fn quote_volumes(&self) -> Result<HashMap<String, f64>> {
        let url = format!("{}/fapi/v1/ticker/24hr", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch 24hr ticker")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("24hr ticker fetch failed: {}", error_text);
        }

        let tickers: Vec<Ticker24h> = response
            .json()
            .await
            .context("Failed to parse 24hr ticker response")?;

        Ok(tickers
            .into_iter()
            .filter_map(|t| {
                let volume = t.quote_volume.parse::<f64>().ok()?;
                Some((t.symbol, volume))
            })
            .collect())
    }

    /// The top `limit` perpetual contracts by 24h quote volume, descending
    pub async fn top_perpetual_symbols(&self, limit: usize) -> Result<Vec<String>> {
        let universe = self.perpetual_universe().await?;
        let volumes = self.quote_volumes().await?;

        let mut ranked: Vec<(String, f64)> = universe
            .into_iter()
            .map(|symbol| {
                let volume = volumes.get(&symbol).copied().unwrap_or(0.0);
                (symbol, volume)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let top: Vec<String> = ranked
            .into_iter()
            .take(limit)
            .map(|(symbol, _)| symbol)
            .collect();

        info!(
            "FuturesMarketClient: tracking top {} contracts by quote volume",
            top.len()
        );
        Ok(top)
    }
}
