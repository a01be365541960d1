use crate::exchanges::{self, Credentials};
use anyhow::{Context, bail};
use chrono::{FixedOffset, Offset, Utc};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_port: u16,
    /// Polled exchanges, in display order.
    pub exchanges: Vec<String>,
    pub reference_exchange: String,
    pub reference_currency: String,
    pub refresh_interval: Duration,
    pub request_timeout: Duration,
    pub display_offset: FixedOffset,
    /// Shared secret for the push endpoint. `None` disables pushing.
    pub ingest_secret: Option<String>,
    /// Run the local refresh loop. Off when a remote agent pushes snapshots.
    pub local_refresh: bool,
    pub log_json: bool,
    pub credentials: HashMap<String, Credentials>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: 3000,
            exchanges: vec!["binance".into(), "bybit".into(), "bitget".into()],
            reference_exchange: "binance".into(),
            reference_currency: "USDT".into(),
            refresh_interval: Duration::from_secs(60),
            request_timeout: Duration::from_millis(10_000),
            display_offset: FixedOffset::east_opt(8 * 3600).unwrap_or_else(|| Utc.fix()),
            ingest_secret: None,
            local_refresh: true,
            log_json: false,
            credentials: HashMap::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        // default to all supported exchanges if EXCHANGES is not set
        let exchanges = match var("EXCHANGES") {
            Some(list) => parse_exchange_list(&list)?,
            None => defaults.exchanges,
        };

        let reference_exchange = var("REFERENCE_EXCHANGE")
            .map(|s| s.to_lowercase())
            .unwrap_or(defaults.reference_exchange);
        if !exchanges.contains(&reference_exchange) {
            bail!("REFERENCE_EXCHANGE {reference_exchange} is not in EXCHANGES {exchanges:?}");
        }

        let offset_hours: i32 = parse_var(&var, "DISPLAY_UTC_OFFSET_HOURS")?.unwrap_or(8);
        let display_offset = FixedOffset::east_opt(offset_hours * 3600)
            .with_context(|| format!("DISPLAY_UTC_OFFSET_HOURS out of range: {offset_hours}"))?;

        let refresh_secs: u64 = parse_var(&var, "REFRESH_INTERVAL_SECS")?.unwrap_or(60);
        if refresh_secs == 0 {
            bail!("REFRESH_INTERVAL_SECS must be at least 1");
        }

        let timeout_ms: u64 = parse_var(&var, "REQUEST_TIMEOUT_MS")?.unwrap_or(10_000);
        if timeout_ms == 0 {
            bail!("REQUEST_TIMEOUT_MS must be at least 1");
        }

        let credentials = exchanges
            .iter()
            .filter_map(|name| {
                let prefix = name.to_uppercase();
                let api_key = var(&format!("{prefix}_API_KEY"))?;
                let secret = var(&format!("{prefix}_SECRET"))?;
                Some((name.clone(), Credentials { api_key, secret }))
            })
            .collect();

        Ok(Self {
            api_port: parse_var(&var, "API_PORT")?.unwrap_or(defaults.api_port),
            exchanges,
            reference_exchange,
            reference_currency: var("REFERENCE_CURRENCY")
                .map(|s| s.to_uppercase())
                .unwrap_or(defaults.reference_currency),
            refresh_interval: Duration::from_secs(refresh_secs),
            request_timeout: Duration::from_millis(timeout_ms),
            display_offset,
            ingest_secret: var("INGEST_SECRET"),
            local_refresh: parse_flag(var("LOCAL_REFRESH").as_deref()).unwrap_or(true),
            log_json: var("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            credentials,
        })
    }
}

fn parse_var<T, V>(var: &V, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    V: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("{key} has an invalid value: {raw}"))
        })
        .transpose()
}

fn parse_flag(raw: Option<&str>) -> Option<bool> {
    match raw?.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_exchange_list(raw: &str) -> anyhow::Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for name in raw.split(',').map(|s| s.trim().to_lowercase()) {
        if name.is_empty() || names.contains(&name) {
            continue;
        }
        if !exchanges::is_supported(&name) {
            bail!("EXCHANGES lists unsupported exchange: {name}");
        }
        names.push(name);
    }
    if names.is_empty() {
        bail!("EXCHANGES must name at least one exchange");
    }
    Ok(names)
}
