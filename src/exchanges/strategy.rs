use super::{ConnectionConfig, Credentials, Exchange, FundingEntry, MarketConnector, MarketType};
use crate::errors::ExchangeError;
use crate::models::RawQuote;
use crate::normalize::SettlementPolicy;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Ways of obtaining funding data from a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieval {
    /// One call returning every instrument's funding data.
    BulkFunding,
    /// Ticker snapshot, keeping only tickers that carry a funding rate.
    Tickers,
}

/// Per-exchange retrieval recipe.
#[derive(Debug, Clone)]
pub struct FetchStrategy {
    pub market_type: MarketType,
    pub rate_limit: Duration,
    pub primary: Retrieval,
    pub fallback: Option<Retrieval>,
    pub settlement: SettlementPolicy,
}

/// Per-deployment connection settings.
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    pub timeout: Duration,
    pub credentials: Option<Credentials>,
}

pub type Connect =
    Arc<dyn Fn(&ConnectionConfig) -> Result<Box<dyn MarketConnector>, ExchangeError> + Send + Sync>;

pub fn connect_with<F>(f: F) -> Connect
where
    F: Fn(&ConnectionConfig) -> Result<Box<dyn MarketConnector>, ExchangeError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Drives one exchange's connector through its `FetchStrategy`.
pub struct StrategyAdapter {
    name: &'static str,
    strategy: FetchStrategy,
    settings: AdapterSettings,
    connect: Connect,
}

impl StrategyAdapter {
    pub fn new(
        name: &'static str,
        strategy: FetchStrategy,
        settings: AdapterSettings,
        connect: Connect,
    ) -> Self {
        Self {
            name,
            strategy,
            settings,
            connect,
        }
    }

    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            market_type: self.strategy.market_type,
            timeout: self.settings.timeout,
            rate_limit: self.strategy.rate_limit,
            credentials: self.settings.credentials.clone(),
        }
    }

    async fn retrieve(
        &self,
        connector: &dyn MarketConnector,
        method: Retrieval,
    ) -> Result<BTreeMap<String, FundingEntry>, ExchangeError> {
        match method {
            Retrieval::BulkFunding => {
                if !connector.has_bulk_funding() {
                    return Err(ExchangeError::Unsupported("bulk funding rates"));
                }
                connector.fetch_funding_rates().await
            }
            Retrieval::Tickers => Ok(funding_from_tickers(connector.fetch_tickers().await?)),
        }
    }

    /// Pushes quotes into `quotes` as they are produced so a late failure
    /// still leaves the earlier ones for the caller.
    async fn collect(&self, quotes: &mut Vec<RawQuote>) -> Result<(), ExchangeError> {
        let name = self.name;
        let mut connector = (self.connect)(&self.connection_config())?;

        let loaded = connector.load_markets().await?;
        tracing::debug!("[{name}] loaded {loaded} markets");

        let entries = match self.retrieve(connector.as_ref(), self.strategy.primary).await {
            Ok(entries) => entries,
            Err(e) => {
                let Some(fallback) = self.strategy.fallback else {
                    return Err(e);
                };
                match &e {
                    ExchangeError::Unsupported(_) => {
                        tracing::debug!("[{name}] {e}, using {fallback:?}")
                    }
                    _ => tracing::warn!("[{name}] primary retrieval failed: {e}, using {fallback:?}"),
                }
                self.retrieve(connector.as_ref(), fallback).await?
            }
        };

        for (symbol, entry) in entries {
            let Some(rate) = entry.funding_rate else {
                continue;
            };
            quotes.push(RawQuote {
                exchange: name,
                symbol,
                rate,
                timestamps: entry.timestamps,
                info: entry.info,
            });
        }

        Ok(())
    }
}

/// Keeps tickers with a funding rate; the settlement time, if any, is
/// carried under `fundingTimestamp`.
fn funding_from_tickers(tickers: BTreeMap<String, FundingEntry>) -> BTreeMap<String, FundingEntry> {
    tickers
        .into_iter()
        .filter(|(_, t)| t.funding_rate.is_some())
        .map(|(symbol, ticker)| {
            let next = ticker
                .timestamps
                .get("nextFundingTime")
                .or_else(|| ticker.timestamps.get("fundingTimestamp"))
                .copied();

            let entry = FundingEntry {
                funding_rate: ticker.funding_rate,
                timestamps: next
                    .map(|ms| BTreeMap::from([("fundingTimestamp".to_string(), ms)]))
                    .unwrap_or_default(),
                info: ticker.info,
            };
            (symbol, entry)
        })
        .collect()
}

#[async_trait]
impl Exchange for StrategyAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn settlement(&self) -> &SettlementPolicy {
        &self.strategy.settlement
    }

    async fn fetch(&self) -> Vec<RawQuote> {
        let mut quotes = Vec::new();

        if let Err(e) = self.collect(&mut quotes).await {
            tracing::error!("[{}] Error fetching funding rates: {}", self.name, e);
            metrics::counter!("funding_exchange_failures_total", "exchange" => self.name)
                .increment(1);
        }

        quotes
    }
}
