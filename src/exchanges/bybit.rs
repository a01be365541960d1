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

pub const NAME: &str = "bybit";

/// Header carrying the optional API key.
const API_KEY_HEADER: &str = "x-bapi-api-key";

const BASE_URL: &str = "https://api.bybit.com";

/// Instrument pages are capped so a misbehaving cursor cannot loop forever.
const MAX_INSTRUMENT_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct BybitResponse<T> {
    #[serde(rename = "retCode")]
    ret_code: i32,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: T,
}

impl<T> BybitResponse<T> {
    // Bybit signals errors via retCode, not just HTTP status
    fn into_result(self) -> Result<T, ExchangeError> {
        if self.ret_code != 0 {
            return Err(ExchangeError::Rejected(format!(
                "Bybit retCode {}: {}",
                self.ret_code, self.ret_msg
            )));
        }
        Ok(self.result)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentPage {
    list: Vec<Instrument>,
    #[serde(default)]
    next_page_cursor: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    symbol: String,
    contract_type: String,
    status: String,
    base_coin: String,
    quote_coin: String,
    settle_coin: String,
}

#[derive(Debug, Deserialize)]
struct TickerList {
    list: Vec<serde_json::Value>,
}

pub struct BybitConnector {
    http: RestClient,
    markets: Markets,
}

impl BybitConnector {
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

/// Bybit exposes no bulk funding call; linear tickers carry the rate and
/// the next funding time instead.
pub fn strategy() -> FetchStrategy {
    FetchStrategy {
        market_type: MarketType::Swap,
        rate_limit: Duration::from_millis(20),
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
    StrategyAdapter::new(NAME, strategy(), settings, connect_with(BybitConnector::connect))
}

fn add_perpetuals(markets: &mut Markets, page: &InstrumentPage) {
    for i in &page.list {
        if i.contract_type == "LinearPerpetual" && i.status == "Trading" {
            markets.insert(&i.symbol, &i.base_coin, &i.quote_coin, &i.settle_coin);
        }
    }
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
        if let Some(ms) = info.get("nextFundingTime").and_then(json_millis) {
            timestamps.insert("nextFundingTime".to_string(), ms);
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
impl MarketConnector for BybitConnector {
    async fn load_markets(&mut self) -> Result<usize, ExchangeError> {
        let mut markets = Markets::default();
        let mut cursor = String::new();

        for _ in 0..MAX_INSTRUMENT_PAGES {
            let mut url =
                format!("{BASE_URL}/v5/market/instruments-info?category=linear&limit=1000");
            if !cursor.is_empty() {
                url.push_str("&cursor=");
                url.push_str(&cursor);
            }

            let page = self
                .http
                .get_json::<BybitResponse<InstrumentPage>>(&url)
                .await?
                .into_result()?;

            add_perpetuals(&mut markets, &page);
            if page.next_page_cursor.is_empty() {
                break;
            }
            cursor = page.next_page_cursor;
        }

        self.markets = markets;
        Ok(self.markets.len())
    }

    fn has_bulk_funding(&self) -> bool {
        false
    }

    async fn fetch_funding_rates(&self) -> Result<BTreeMap<String, FundingEntry>, ExchangeError> {
        Err(ExchangeError::Unsupported("bulk funding rates"))
    }

    async fn fetch_tickers(&self) -> Result<BTreeMap<String, FundingEntry>, ExchangeError> {
        let url = format!("{BASE_URL}/v5/market/tickers?category=linear");
        let tickers = self
            .http
            .get_json::<BybitResponse<TickerList>>(&url)
            .await?
            .into_result()?;

        Ok(ticker_entries(&self.markets, tickers.list))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::Credentials;
    use serde_json::json;

    #[test]
    fn nonzero_ret_code_is_rejected() {
        let response: BybitResponse<TickerList> = serde_json::from_value(json!({
            "retCode": 10006,
            "retMsg": "Too many visits!",
            "result": {"list": []}
        }))
        .unwrap();

        let err = response.into_result().unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected(msg) if msg.contains("10006")));
    }

    #[test]
    fn maps_linear_tickers() {
        let page: InstrumentPage = serde_json::from_value(json!({
            "list": [
                {"symbol": "BTCUSDT", "contractType": "LinearPerpetual", "status": "Trading",
                 "baseCoin": "BTC", "quoteCoin": "USDT", "settleCoin": "USDT"},
                {"symbol": "BTC-27DEC24", "contractType": "LinearFutures", "status": "Trading",
                 "baseCoin": "BTC", "quoteCoin": "USDC", "settleCoin": "USDC"}
            ],
            "nextPageCursor": ""
        }))
        .unwrap();
        let mut markets = Markets::default();
        add_perpetuals(&mut markets, &page);
        assert_eq!(markets.len(), 1);

        let entries = ticker_entries(
            &markets,
            vec![
                json!({"symbol": "BTCUSDT", "lastPrice": "35000", "fundingRate": "-0.0002",
                       "nextFundingTime": "1700006400000"}),
                json!({"symbol": "BTC-27DEC24", "lastPrice": "36000", "fundingRate": "",
                       "nextFundingTime": "0"}),
            ],
        );

        let btc = &entries["BTC/USDT:USDT"];
        assert_eq!(btc.funding_rate, Some(-0.0002));
        assert_eq!(btc.timestamps.get("nextFundingTime"), Some(&1_700_006_400_000));

        let dated = &entries["BTC-27DEC24"];
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
        assert_eq!(headers["X-BAPI-API-KEY"], "k");
        assert!(api_key_headers(API_KEY_HEADER, None).unwrap().is_empty());
    }
}
