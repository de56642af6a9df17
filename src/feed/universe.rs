//! # feed::universe
//!
//! Which symbols to monitor.
//!
//! ## Filter (Binance USDⓈ-M futures)
//! 1. symbol ends with the quote asset (`USDT`) and is `TRADING`
//! 2. listed at least `MIN_LISTING_DAYS` ago (`onboardDate`)
//! 3. 24h quote volume inside `[MIN_QUOTE_VOLUME, MAX_QUOTE_VOLUME]`

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::config::UniverseConfig;
use crate::error::FeedError;

#[async_trait]
pub trait UniverseProvider: Send + Sync {
    /// Candidate symbols for the next monitoring cycle.
    async fn list_candidates(&self) -> Result<BTreeSet<String>, FeedError>;
}

// ─── StaticUniverse ───────────────────────────────────────────────────────────

/// Fixed list from `SYMBOLS` (dev / pinned deployments).
#[derive(Debug, Clone)]
pub struct StaticUniverse(BTreeSet<String>);

impl StaticUniverse {
    pub fn new(symbols: BTreeSet<String>) -> Self {
        Self(symbols)
    }
}

#[async_trait]
impl UniverseProvider for StaticUniverse {
    async fn list_candidates(&self) -> Result<BTreeSet<String>, FeedError> {
        Ok(self.0.clone())
    }
}

// ─── BinanceUniverse ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol:       String,
    #[serde(default)]
    pub status:       String,
    #[serde(default)]
    pub onboard_date: i64,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24h {
    pub symbol:       String,
    pub quote_volume: String,
}

pub struct BinanceUniverse {
    client: reqwest::Client,
    config: UniverseConfig,
}

impl BinanceUniverse {
    pub fn new(client: reqwest::Client, config: UniverseConfig) -> Self {
        Self { client, config }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, FeedError> {
        let url = format!("{}{path}", self.config.rest_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(FeedError::Http(format!("{path} → HTTP {status}: {body}")));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl UniverseProvider for BinanceUniverse {
    async fn list_candidates(&self) -> Result<BTreeSet<String>, FeedError> {
        let info: ExchangeInfo = self.get("/fapi/v1/exchangeInfo").await?;
        let tickers: Vec<Ticker24h> = self.get("/fapi/v1/ticker/24hr").await?;

        let candidates = filter_candidates(&info.symbols, &tickers, Utc::now(), &self.config);
        info!(
            listed   = info.symbols.len(),
            filtered = candidates.len(),
            "🟢 Universe refreshed"
        );
        Ok(candidates)
    }
}

/// Apply quote-asset, status, listing-age and volume filters.
pub fn filter_candidates(
    symbols: &[SymbolInfo],
    tickers: &[Ticker24h],
    now:     DateTime<Utc>,
    config:  &UniverseConfig,
) -> BTreeSet<String> {
    let volumes: HashMap<&str, f64> = tickers
        .iter()
        .filter_map(|t| t.quote_volume.parse().ok().map(|v| (t.symbol.as_str(), v)))
        .collect();

    let min_age_ms = config.min_listing_days.saturating_mul(24 * 60 * 60 * 1000);
    let now_ms = now.timestamp_millis();

    symbols
        .iter()
        .filter(|s| s.symbol.ends_with(&config.quote_asset))
        .filter(|s| s.status.is_empty() || s.status == "TRADING")
        .filter(|s| now_ms - s.onboard_date >= min_age_ms)
        .filter(|s| {
            volumes
                .get(s.symbol.as_str())
                .is_some_and(|&v| v >= config.min_quote_volume && v <= config.max_quote_volume)
        })
        .map(|s| s.symbol.clone())
        .collect()
}
