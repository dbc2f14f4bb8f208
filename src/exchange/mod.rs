// =============================================================================
// Exchange Connectivity Module
// =============================================================================
//
// The sampler only knows the `OrderBookSource` trait. Concrete connectors are
// registered by identifier in a `ConnectorRegistry`, which is consulted once
// at startup so an unknown exchange name fails immediately and clearly.

pub mod binance;
pub mod rate_limit;

pub use binance::BinanceConnector;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::OrderBookDepth;

/// Source of raw order books (the exchange connector contract).
///
/// `fetch` returns both sides ordered best price first and may fail
/// transiently; it performs no retries of its own.
#[async_trait]
pub trait OrderBookSource: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Establish the session (e.g. load the market list). A failure here is
    /// fatal to a collection run.
    async fn initialise(&self) -> Result<()>;

    /// Fetch the top `depth` levels of the book for `symbol`.
    async fn fetch(&self, symbol: &str, depth: usize) -> Result<OrderBookDepth>;
}

/// Settings handed to every connector constructor.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// Upper bound on any single HTTP request.
    pub request_timeout: Duration,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Constructor for a registered connector.
pub type ConnectorConstructor = fn(&ConnectorSettings) -> Result<Box<dyn OrderBookSource>>;

/// Explicit mapping from exchange identifiers to connector constructors.
pub struct ConnectorRegistry {
    constructors: BTreeMap<String, ConnectorConstructor>,
}

impl ConnectorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with every built-in connector.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("binance", |settings| {
            Ok(Box::new(BinanceConnector::new(
                "binance",
                binance::BINANCE_BASE_URL,
                settings,
            )?))
        });
        registry.register("binanceus", |settings| {
            Ok(Box::new(BinanceConnector::new(
                "binanceus",
                binance::BINANCE_US_BASE_URL,
                settings,
            )?))
        });
        registry
    }

    pub fn register(&mut self, id: &str, constructor: ConnectorConstructor) {
        self.constructors.insert(id.to_lowercase(), constructor);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(&id.to_lowercase())
    }

    /// Known identifiers in sorted order.
    pub fn ids(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Fail unless `id` is registered.
    pub fn validate(&self, id: &str) -> Result<()> {
        if self.contains(id) {
            Ok(())
        } else {
            anyhow::bail!(
                "unknown exchange '{}' (known: {})",
                id,
                self.ids().join(", ")
            )
        }
    }

    /// Construct the connector registered under `id`.
    pub fn build(&self, id: &str, settings: &ConnectorSettings) -> Result<Box<dyn OrderBookSource>> {
        self.validate(id)?;
        let constructor = self.constructors[&id.to_lowercase()];
        constructor(settings)
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
