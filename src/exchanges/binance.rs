use super::http::{RestClient, api_key_headers, parse_rate};
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

pub const NAME: &str = "binance";

/// Header carrying the optional API key.
const API_KEY_HEADER: &str = "x-mbx-apikey";

const BASE_URL: &str = "https://fapi.binance.com";

/// The raw JSON shape of `/fapi/v1/exchangeInfo`
#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    contract_type: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    margin_asset: String,
}

/// One element of `/fapi/v1/premiumIndex`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    symbol: String,

    last_funding_rate: String,

    #[serde(default)]
    next_funding_time: i64,
}

/// One element of `/fapi/v1/ticker/24hr`. Carries no funding data.
#[derive(Debug, Deserialize)]
struct Ticker {
    symbol: String,
}

pub struct BinanceConnector {
    http: RestClient,
    markets: Markets,
}

impl BinanceConnector {
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
}

pub fn strategy() -> FetchStrategy {
    FetchStrategy {
        market_type: MarketType::Future,
        rate_limit: Duration::from_millis(50),
        primary: Retrieval::BulkFunding,
        fallback: Some(Retrieval::Tickers),
        settlement: SettlementPolicy {
            fields: SETTLEMENT_FIELDS,
            info_fields: &[],
            cadence: None,
        },
    }
}

pub fn adapter(settings: AdapterSettings) -> StrategyAdapter {
    StrategyAdapter::new(NAME, strategy(), settings, connect_with(BinanceConnector::connect))
}

/// Only trading perpetuals are kept; dated contracts would collide with
/// them once the settle tag is collapsed.
fn perpetual_markets(info: ExchangeInfo) -> Markets {
    let mut markets = Markets::default();
    for s in info.symbols {
        if s.contract_type == "PERPETUAL" && s.status == "TRADING" {
            markets.insert(&s.symbol, &s.base_asset, &s.quote_asset, &s.margin_asset);
        }
    }
    markets
}

fn funding_entries(markets: &Markets, payload: Vec<serde_json::Value>) -> BTreeMap<String, FundingEntry> {
    let mut entries = BTreeMap::new();

    for info in payload {
        let item: PremiumIndex = match serde_json::from_value(info.clone()) {
            Ok(item) => item,
            Err(e) => {
                tracing::debug!("[{NAME}] skipping premiumIndex item: {e}");
                continue;
            }
        };

        let mut timestamps = BTreeMap::new();
        if item.next_funding_time > 0 {
            timestamps.insert("nextFundingTime".to_string(), item.next_funding_time);
        }

        entries.insert(
            markets.symbol(&item.symbol),
            FundingEntry {
                funding_rate: parse_rate(&item.last_funding_rate),
                timestamps,
                info,
            },
        );
    }

    entries
}

#[async_trait]
impl MarketConnector for BinanceConnector {
    async fn load_markets(&mut self) -> Result<usize, ExchangeError> {
        let url = format!("{BASE_URL}/fapi/v1/exchangeInfo");
        let info = self.http.get_json::<ExchangeInfo>(&url).await?;

        self.markets = perpetual_markets(info);
        if self.markets.is_empty() {
            return Err(ExchangeError::UnexpectedData(
                "exchangeInfo listed no perpetual markets".to_string(),
            ));
        }
        Ok(self.markets.len())
    }

    fn has_bulk_funding(&self) -> bool {
        true
    }

    /// Hits the premiumIndex endpoint without a symbol, which returns every
    /// contract's last funding rate and next funding time.
    async fn fetch_funding_rates(&self) -> Result<BTreeMap<String, FundingEntry>, ExchangeError> {
        let url = format!("{BASE_URL}/fapi/v1/premiumIndex");
        let payload = self.http.get_json::<Vec<serde_json::Value>>(&url).await?;
        Ok(funding_entries(&self.markets, payload))
    }

    async fn fetch_tickers(&self) -> Result<BTreeMap<String, FundingEntry>, ExchangeError> {
        let url = format!("{BASE_URL}/fapi/v1/ticker/24hr");
        let payload = self.http.get_json::<Vec<serde_json::Value>>(&url).await?;

        let mut tickers = BTreeMap::new();
        for info in payload {
            if let Ok(ticker) = serde_json::from_value::<Ticker>(info.clone()) {
                tickers.insert(
                    self.markets.symbol(&ticker.symbol),
                    FundingEntry {
                        funding_rate: None,
                        timestamps: BTreeMap::new(),
                        info,
                    },
                );
            }
        }
        Ok(tickers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::Credentials;
    use serde_json::json;

    fn markets() -> Markets {
        let info: ExchangeInfo = serde_json::from_value(json!({
            "symbols": [
                {"symbol": "BTCUSDT", "contractType": "PERPETUAL", "status": "TRADING",
                 "baseAsset": "BTC", "quoteAsset": "USDT", "marginAsset": "USDT"},
                {"symbol": "BTCUSDT_250328", "contractType": "CURRENT_QUARTER", "status": "TRADING",
                 "baseAsset": "BTC", "quoteAsset": "USDT", "marginAsset": "USDT"},
                {"symbol": "ETHUSDC", "contractType": "PERPETUAL", "status": "TRADING",
                 "baseAsset": "ETH", "quoteAsset": "USDC", "marginAsset": "USDC"},
                {"symbol": "LUNAUSDT", "contractType": "PERPETUAL", "status": "SETTLING",
                 "baseAsset": "LUNA", "quoteAsset": "USDT", "marginAsset": "USDT"}
            ]
        }))
        .unwrap();
        perpetual_markets(info)
    }

    #[test]
    fn keeps_trading_perpetuals_only() {
        let markets = markets();
        assert_eq!(markets.len(), 2);
        assert_eq!(markets.symbol("BTCUSDT"), "BTC/USDT:USDT");
        assert_eq!(markets.symbol("ETHUSDC"), "ETH/USDC:USDC");
        assert_eq!(markets.symbol("BTCUSDT_250328"), "BTCUSDT_250328");
    }

    #[test]
    fn maps_premium_index_payload() {
        let payload = vec![
            json!({"symbol": "BTCUSDT", "markPrice": "35000.1", "lastFundingRate": "0.00010000",
                   "nextFundingTime": 1700006400000i64, "time": 1700000000000i64}),
            json!({"symbol": "BTCUSDT_250328", "lastFundingRate": "", "nextFundingTime": 0}),
            json!({"unexpected": true}),
        ];

        let entries = funding_entries(&markets(), payload);
        assert_eq!(entries.len(), 2);

        let btc = &entries["BTC/USDT:USDT"];
        assert_eq!(btc.funding_rate, Some(0.0001));
        assert_eq!(btc.timestamps.get("nextFundingTime"), Some(&1_700_006_400_000));
        assert_eq!(btc.info["markPrice"], "35000.1");

        let dated = &entries["BTCUSDT_250328"];
        assert_eq!(dated.funding_rate, None);
        assert!(dated.timestamps.is_empty());
    }

    #[test]
    fn credentials_become_api_key_header() {
        let creds = Credentials {
            api_key: "k".into(),
            secret: "s".into(),
        };
        let headers = api_key_headers(API_KEY_HEADER, Some(&creds)).unwrap();
        assert_eq!(headers["X-MBX-APIKEY"], "k");
        assert!(api_key_headers(API_KEY_HEADER, None).unwrap().is_empty());
    }
}
