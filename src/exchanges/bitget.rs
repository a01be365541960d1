use super::http::{RestClient, api_key_headers, json_millis, parse_rate};
use super::strategy::connect_with;
use super::{
    AdapterSettings, ConnectionConfig, FetchStrategy, FundingEntry, MarketConnector, MarketType,
    Markets, Retrieval, StrategyAdapter,
};
use crate::errors::ExchangeError;
use crate::normalize::{SETTLEMENT_FIELDS, SettlementPolicy};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub const NAME: &str = "bitget";

/// Header carrying the optional API key.
const API_KEY_HEADER: &str = "access-key";

const BASE_URL: &str = "https://api.bitget.com";
const PRODUCT_TYPE: &str = "USDT-FUTURES";
const SUCCESS: &str = "00000";

/// Bitget settles every 8 hours at 00:00, 08:00 and 16:00 UTC.
const SETTLEMENT_CADENCE: Duration = Duration::from_secs(8 * 60 * 60);

#[derive(Debug, Deserialize)]
struct BitgetResponse<T> {
    code: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

impl<T> BitgetResponse<T> {
    fn into_data(self) -> Result<T, ExchangeError> {
        if self.code != SUCCESS {
            return Err(ExchangeError::Rejected(format!(
                "Bitget code {}: {}",
                self.code, self.msg
            )));
        }
        self.data
            .ok_or_else(|| ExchangeError::UnexpectedData("Bitget response without data".to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Contract {
    symbol: String,
    base_coin: String,
    quote_coin: String,
    #[serde(default)]
    symbol_type: String,
    #[serde(default)]
    symbol_status: String,
}

pub struct BitgetConnector {
    http: RestClient,
    markets: Markets,
}

impl BitgetConnector {
    pub fn connect(config: &ConnectionConfig) -> Result<Box<dyn MarketConnector>, ExchangeError> {
        tracing::debug!(
            "[{NAME}] opening {:?} session, authenticated: {}",
            config.market_type,
            config.credentials.is_some()
        );

        let headers = api_key_headers(API_KEY_HEADER, config.credentials.as_ref())?;

        Ok(Box::new(Self {
            http: RestClient::new(config, headers)?,
            markets: Markets::default(),
        }))
    }

    async fn tickers(&self) -> Result<BTreeMap<String, FundingEntry>, ExchangeError> {
        let url = format!("{BASE_URL}/api/v2/mix/market/tickers?productType={PRODUCT_TYPE}");
        let list = self
            .http
            .get_json::<BitgetResponse<Vec<serde_json::Value>>>(&url)
            .await?
            .into_data()?;

        Ok(ticker_entries(&self.markets, list))
    }
}

/// Tickers carry no settlement field, so the raw payload is probed first
/// and the fixed cadence is used when it has nothing either.
pub fn strategy() -> FetchStrategy {
    FetchStrategy {
        market_type: MarketType::Swap,
        rate_limit: Duration::from_millis(50),
        primary: Retrieval::BulkFunding,
        fallback: Some(Retrieval::Tickers),
        settlement: SettlementPolicy {
            fields: SETTLEMENT_FIELDS,
            info_fields: &["nextFundingTime", "nextUpdate"],
            cadence: Some(SETTLEMENT_CADENCE),
        },
    }
}

pub fn adapter(settings: AdapterSettings) -> StrategyAdapter {
    StrategyAdapter::new(NAME, strategy(), settings, connect_with(BitgetConnector::connect))
}

fn perpetual_markets(contracts: Vec<Contract>) -> Markets {
    let mut markets = Markets::default();
    for c in contracts {
        if c.symbol_type == "perpetual" && c.symbol_status == "normal" {
            // USDT-FUTURES contracts are all margined and settled in the quote coin
            markets.insert(&c.symbol, &c.base_coin, &c.quote_coin, &c.quote_coin);
        }
    }
    markets
}

fn ticker_entries(markets: &Markets, list: Vec<serde_json::Value>) -> BTreeMap<String, FundingEntry> {
    let mut entries = BTreeMap::new();

    for info in list {
        let Some(symbol) = info.get("symbol").and_then(|s| s.as_str()) else {
            continue;
        };
        let symbol = markets.symbol(symbol);

        let funding_rate = info
            .get("fundingRate")
            .and_then(|r| r.as_str())
            .and_then(parse_rate);

        let mut timestamps = BTreeMap::new();
        if let Some(ms) = info.get("fundingTime").and_then(json_millis) {
            timestamps.insert("fundingTime".to_string(), ms);
        }

        entries.insert(
            symbol,
            FundingEntry {
                funding_rate,
                timestamps,
                info,
            },
        );
    }

    entries
}

#[async_trait]
impl MarketConnector for BitgetConnector {
    async fn load_markets(&mut self) -> Result<usize, ExchangeError> {
        let url = format!("{BASE_URL}/api/v2/mix/market/contracts?productType={PRODUCT_TYPE}");
        let contracts = self
            .http
            .get_json::<BitgetResponse<Vec<Contract>>>(&url)
            .await?
            .into_data()?;

        self.markets = perpetual_markets(contracts);
        Ok(self.markets.len())
    }

    fn has_bulk_funding(&self) -> bool {
        true
    }

    /// The USDT-FUTURES ticker list doubles as the bulk funding source.
    async fn fetch_funding_rates(&self) -> Result<BTreeMap<String, FundingEntry>, ExchangeError> {
        self.tickers().await
    }

    async fn fetch_tickers(&self) -> Result<BTreeMap<String, FundingEntry>, ExchangeError> {
        self.tickers().await
    }
}
