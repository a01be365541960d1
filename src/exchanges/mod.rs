use crate::config::Config;
use crate::errors::ExchangeError;
use crate::models::RawQuote;
use crate::normalize::SettlementPolicy;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod http;
pub mod strategy;

pub use strategy::{AdapterSettings, FetchStrategy, Retrieval, StrategyAdapter};

/// Contract flavour an exchange lists its perpetuals under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketType {
    Future,
    Swap,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret", &if self.secret.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// Everything a connector needs to open a fresh session for one cycle.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub market_type: MarketType,
    pub timeout: Duration,
    /// Minimum spacing between requests. Zero disables client-side limiting.
    pub rate_limit: Duration,
    pub credentials: Option<Credentials>,
}

/// Funding data for one instrument, as returned by either retrieval path.
#[derive(Debug, Clone, Default)]
pub struct FundingEntry {
    pub funding_rate: Option<f64>,
    pub timestamps: BTreeMap<String, i64>,
    pub info: serde_json::Value,
}

/// Native exchange id → unified `BASE/QUOTE:SETTLE` symbol.
#[derive(Debug, Clone, Default)]
pub struct Markets {
    by_id: HashMap<String, String>,
}

impl Markets {
    pub fn insert(&mut self, id: &str, base: &str, quote: &str, settle: &str) {
        self.by_id
            .insert(id.to_string(), format!("{base}/{quote}:{settle}"));
    }

    /// Unified symbol for a native id; unknown ids are passed through as-is.
    pub fn symbol(&self, id: &str) -> String {
        self.by_id
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Connectivity capability an exchange must provide. One instance serves a
/// single refresh cycle.
#[async_trait]
pub trait MarketConnector: Send + Sync {
    /// Loads market metadata. Must run before any rate request.
    async fn load_markets(&mut self) -> Result<usize, ExchangeError>;

    fn has_bulk_funding(&self) -> bool;

    /// All funding rates in one call, keyed by market symbol.
    async fn fetch_funding_rates(&self) -> Result<BTreeMap<String, FundingEntry>, ExchangeError>;

    /// All tickers, keyed by market symbol. Entries may lack a funding rate.
    async fn fetch_tickers(&self) -> Result<BTreeMap<String, FundingEntry>, ExchangeError>;
}

#[async_trait]
pub trait Exchange: Send + Sync {
    fn name(&self) -> &'static str;

    /// How settlement times are resolved for this exchange's quotes.
    fn settlement(&self) -> &SettlementPolicy;

    /// Best-available quotes for this cycle. Never fails: errors are logged
    /// and whatever was gathered (commonly nothing) is returned.
    async fn fetch(&self) -> Vec<RawQuote>;
}

type Constructor = fn(AdapterSettings) -> StrategyAdapter;

/// Exchanges this build knows how to talk to.
const BUILTIN: &[(&str, Constructor)] = &[
    (binance::NAME, binance::adapter),
    (bybit::NAME, bybit::adapter),
    (bitget::NAME, bitget::adapter),
];

pub fn is_supported(name: &str) -> bool {
    BUILTIN.iter().any(|(n, _)| *n == name)
}

/// Ordered set of exchanges polled each cycle.
#[derive(Default, Clone)]
pub struct ExchangeRegistry {
    exchanges: Vec<Arc<dyn Exchange>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the built-in adapter for every configured exchange, in
    /// configuration order.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut registry = Self::new();

        for name in &config.exchanges {
            let (_, construct) = BUILTIN
                .iter()
                .find(|(n, _)| n == name)
                .ok_or_else(|| anyhow::anyhow!("unsupported exchange: {name}"))?;

            let settings = AdapterSettings {
                timeout: config.request_timeout,
                credentials: config.credentials.get(name).cloned(),
            };
            registry.register(Arc::new(construct(settings)));
        }

        Ok(registry)
    }

    pub fn register(&mut self, exchange: Arc<dyn Exchange>) {
        self.exchanges.push(exchange);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.exchanges.iter().map(|e| e.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Exchange>> {
        self.exchanges.iter()
    }
}
