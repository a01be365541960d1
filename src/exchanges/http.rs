use super::{ConnectionConfig, Credentials};
use crate::errors::ExchangeError;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Thin REST client shared by the connectors: bounded timeout plus
/// client-side request spacing.
pub struct RestClient {
    client: reqwest::Client,
    rate_limit: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RestClient {
    pub fn new(config: &ConnectionConfig, headers: HeaderMap) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            rate_limit: config.rate_limit,
            last_request: Mutex::new(None),
        })
    }

    /// Waits until at least `rate_limit` has passed since the previous request.
    async fn throttle(&self) {
        if self.rate_limit.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.rate_limit;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ExchangeError> {
        self.throttle().await;
        tracing::trace!("GET {url}");

        let response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await?;

        Ok(response)
    }
}

/// Default headers for a session: the API key under the exchange's header
/// name, or nothing when no credentials are configured.
pub fn api_key_headers(
    header: &'static str,
    credentials: Option<&Credentials>,
) -> Result<HeaderMap, ExchangeError> {
    let mut headers = HeaderMap::new();
    if let Some(creds) = credentials {
        let key = HeaderValue::from_str(&creds.api_key)
            .map_err(|e| ExchangeError::UnexpectedData(format!("invalid API key: {e}")))?;
        headers.insert(HeaderName::from_static(header), key);
    }
    Ok(headers)
}

/// Exchanges send rates as decimal strings; empty means "not applicable".
pub fn parse_rate(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|r| r.is_finite())
}

/// Reads an epoch-millisecond value sent either as a number or a numeric
/// string. Zero and negatives mean "unset".
pub fn json_millis(value: &serde_json::Value) -> Option<i64> {
    let ms = match value {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (ms > 0).then_some(ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_key_header_only_with_credentials() {
        let creds = Credentials {
            api_key: "my-key".into(),
            secret: "my-secret".into(),
        };

        let headers = api_key_headers("x-api-key", Some(&creds)).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-api-key"], "my-key");

        assert!(api_key_headers("x-api-key", None).unwrap().is_empty());

        let bad = Credentials {
            api_key: "line\nbreak".into(),
            secret: String::new(),
        };
        assert!(matches!(
            api_key_headers("x-api-key", Some(&bad)),
            Err(ExchangeError::UnexpectedData(_))
        ));
    }

    #[test]
    fn parses_rates() {
        assert_eq!(parse_rate("0.00010000"), Some(0.0001));
        assert_eq!(parse_rate("-0.0002"), Some(-0.0002));
        assert_eq!(parse_rate(""), None);
        assert_eq!(parse_rate("abc"), None);
        assert_eq!(parse_rate("NaN"), None);
    }

    #[test]
    fn reads_millis_from_numbers_and_strings() {
        assert_eq!(json_millis(&json!(1700006400000i64)), Some(1_700_006_400_000));
        assert_eq!(json_millis(&json!("1700006400000")), Some(1_700_006_400_000));
        assert_eq!(json_millis(&json!("0")), None);
        assert_eq!(json_millis(&json!("")), None);
        assert_eq!(json_millis(&json!(null)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_spaces_requests() {
        let config = ConnectionConfig {
            market_type: super::super::MarketType::Swap,
            timeout: Duration::from_secs(1),
            rate_limit: Duration::from_millis(50),
            credentials: None,
        };
        let client = RestClient::new(&config, HeaderMap::new()).unwrap();

        let start = Instant::now();
        client.throttle().await;
        client.throttle().await;
        client.throttle().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
