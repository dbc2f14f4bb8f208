// =============================================================================
// Binance REST Connector — public order-book snapshots
// =============================================================================
//
// Only public endpoints are used, so no API key or request signing is needed.
// `initialise` loads the spot market list once; `fetch` pulls a partial book
// from `/api/v3/depth`. Every request is bounded by the configured timeout and
// the used request weight is tracked from response headers.
// =============================================================================

use std::collections::HashSet;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use super::rate_limit::{depth_request_weight, RateLimitTracker};
use super::{ConnectorSettings, OrderBookSource};
use crate::types::{BookLevel, OrderBookDepth};

pub const BINANCE_BASE_URL: &str = "https://api.binance.com";
pub const BINANCE_US_BASE_URL: &str = "https://api.binance.us";

/// Request weight of `GET /api/v3/exchangeInfo` without a symbol filter.
const EXCHANGE_INFO_WEIGHT: u32 = 20;

/// Binance spot connector for order-book snapshots.
pub struct BinanceConnector {
    name: String,
    base_url: String,
    client: reqwest::Client,
    rate_limit: RateLimitTracker,
    /// Exchange symbols (`BTCUSDT`) currently trading; empty until initialised.
    markets: RwLock<HashSet<String>>,
}

impl BinanceConnector {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        settings: &ConnectorSettings,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("failed to build reqwest client")?;

        let base_url = base_url.into();
        debug!(base_url = %base_url, "BinanceConnector initialised");

        Ok(Self {
            name: name.into(),
            base_url,
            client,
            rate_limit: RateLimitTracker::new(),
            markets: RwLock::new(HashSet::new()),
        })
    }

    /// `BTC/USDT` → `BTCUSDT`.
    pub fn exchange_symbol(symbol: &str) -> String {
        symbol
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase()
    }

    pub fn market_count(&self) -> usize {
        self.markets.read().len()
    }

    // -------------------------------------------------------------------------
    // HTTP
    // -------------------------------------------------------------------------

    async fn get_json(&self, path: &str, weight: u32) -> Result<serde_json::Value> {
        if !self.rate_limit.can_send_request(weight) {
            anyhow::bail!("request weight budget exhausted, skipping GET {path}");
        }

        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("Binance GET {} returned {}: {}", path, status, body);
        }

        Ok(body)
    }
}

#[async_trait]
impl OrderBookSource for BinanceConnector {
    fn name(&self) -> &str {
        &self.name
    }

    /// GET /api/v3/exchangeInfo: load the set of trading symbols.
    #[instrument(skip(self), name = "binance::initialise")]
    async fn initialise(&self) -> Result<()> {
        let body = self
            .get_json("/api/v3/exchangeInfo", EXCHANGE_INFO_WEIGHT)
            .await?;
        let markets = parse_markets(&body)?;
        info!(exchange = %self.name, markets = markets.len(), "markets loaded");
        *self.markets.write() = markets;
        Ok(())
    }

    /// GET /api/v3/depth (public, unsigned).
    #[instrument(skip(self), name = "binance::fetch")]
    async fn fetch(&self, symbol: &str, depth: usize) -> Result<OrderBookDepth> {
        let pair = Self::exchange_symbol(symbol);
        {
            let markets = self.markets.read();
            if !markets.is_empty() && !markets.contains(&pair) {
                anyhow::bail!("symbol {symbol} is not trading on {}", self.name);
            }
        }

        let path = format!("/api/v3/depth?symbol={pair}&limit={depth}");
        let body = self.get_json(&path, depth_request_weight(depth)).await?;
        let book = parse_depth(&body, depth)?;

        debug!(
            symbol,
            bids = book.bids.len(),
            asks = book.asks.len(),
            "order book fetched"
        );
        Ok(book)
    }
}

impl std::fmt::Debug for BinanceConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceConnector")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("markets", &self.market_count())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Response parsing
// -----------------------------------------------------------------------------

/// Collect the symbols with `status == "TRADING"` from an exchangeInfo body.
fn parse_markets(body: &serde_json::Value) -> Result<HashSet<String>> {
    let symbols = body["symbols"]
        .as_array()
        .context("exchangeInfo response missing 'symbols' array")?;

    Ok(symbols
        .iter()
        .filter(|s| s["status"].as_str() == Some("TRADING"))
        .filter_map(|s| s["symbol"].as_str().map(str::to_string))
        .collect())
}

/// Parse a partial-depth body, keeping at most `depth` levels per side.
///
/// Expected shape:
/// ```json
/// {
///   "lastUpdateId": 12345,
///   "bids": [["37000.00", "1.5"], ...],
///   "asks": [["37001.00", "1.2"], ...]
/// }
/// ```
fn parse_depth(body: &serde_json::Value, depth: usize) -> Result<OrderBookDepth> {
    let bids = parse_side(&body["bids"], depth).context("invalid bids")?;
    let asks = parse_side(&body["asks"], depth).context("invalid asks")?;
    Ok(OrderBookDepth::new(bids, asks))
}

fn parse_side(side: &serde_json::Value, depth: usize) -> Result<Vec<BookLevel>> {
    let raw = side.as_array().context("side is not an array")?;
    raw.iter()
        .take(depth)
        .map(|entry| {
            let pair = entry.as_array().context("level is not an array")?;
            if pair.len() < 2 {
                anyhow::bail!("level has {} elements, expected 2", pair.len());
            }
            Ok(BookLevel::new(
                parse_str_f64(&pair[0])?,
                parse_str_f64(&pair[1])?,
            ))
        })
        .collect()
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn symbol_mapping_strips_separator() {
        assert_eq!(BinanceConnector::exchange_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(BinanceConnector::exchange_symbol("eth/usdt"), "ETHUSDT");
    }

    #[test]
    fn depth_body_parses_best_first() {
        let body = json!({
            "lastUpdateId": 1,
            "bids": [["100.5", "1.25"], ["100.4", "2"], ["100.3", "3"]],
            "asks": [["100.6", "0.5"], [100.7, 1.0]]
        });
        let book = parse_depth(&body, 2).unwrap();
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.bids[0], BookLevel::new(100.5, 1.25));
        assert_eq!(book.asks[1], BookLevel::new(100.7, 1.0));
    }

    #[test]
    fn malformed_level_is_an_error() {
        let body = json!({ "bids": [["abc", "1"]], "asks": [] });
        assert!(parse_depth(&body, 20).is_err());
        let body = json!({ "bids": [["1.0"]], "asks": [] });
        assert!(parse_depth(&body, 20).is_err());
        let body = json!({ "asks": [] });
        assert!(parse_depth(&body, 20).is_err());
    }

    #[test]
    fn markets_keep_only_trading_symbols() {
        let body = json!({
            "symbols": [
                { "symbol": "BTCUSDT", "status": "TRADING" },
                { "symbol": "OLDUSDT", "status": "BREAK" }
            ]
        });
        let markets = parse_markets(&body).unwrap();
        assert!(markets.contains("BTCUSDT"));
        assert!(!markets.contains("OLDUSDT"));
    }

    #[tokio::test]
    async fn fetch_rejects_unlisted_symbol_without_network() {
        let connector =
            BinanceConnector::new("binance", "http://127.0.0.1:9", &ConnectorSettings::default())
                .unwrap();
        connector.markets.write().insert("BTCUSDT".to_string());
        let err = connector.fetch("DOGE/EUR", 20).await.unwrap_err();
        assert!(err.to_string().contains("not trading"));
    }
}
