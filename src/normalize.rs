use crate::exchanges::http::json_millis;
use crate::models::{CanonicalQuote, RawQuote};
use chrono::{DateTime, FixedOffset};
use std::time::Duration;

/// Settlement field names, in the order they are trusted.
pub const SETTLEMENT_FIELDS: &[&str] = &["fundingTimestamp", "nextFundingTime", "fundingTime"];

/// How one exchange's next settlement time is resolved.
#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    /// Top-level quote fields, tried in order.
    pub fields: &'static [&'static str],
    /// Fields probed inside the raw exchange payload when no top-level
    /// field is present.
    pub info_fields: &'static [&'static str],
    /// Fixed settlement cadence aligned to the epoch, used as a last resort.
    pub cadence: Option<Duration>,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            fields: SETTLEMENT_FIELDS,
            info_fields: &[],
            cadence: None,
        }
    }
}

impl SettlementPolicy {
    pub fn resolve(&self, quote: &RawQuote, now_ms: i64) -> Option<i64> {
        self.fields
            .iter()
            .find_map(|f| quote.timestamps.get(*f).copied().filter(|ms| *ms > 0))
            .or_else(|| {
                self.info_fields
                    .iter()
                    .find_map(|f| quote.info.get(*f).and_then(json_millis))
            })
            .or_else(|| {
                self.cadence
                    .map(|c| next_boundary(now_ms, c.as_millis() as i64))
            })
    }
}

/// First multiple of `interval_ms` strictly after `now_ms`.
pub fn next_boundary(now_ms: i64, interval_ms: i64) -> i64 {
    (now_ms.div_euclid(interval_ms) + 1) * interval_ms
}

/// Collapses contract-suffix notations to `BASE/QUOTE`.
///
/// `BTC/USDT:USDT` and `BTC:USDT` both become `BTC/USDT`; an already
/// canonical symbol is returned unchanged.
pub fn canonical_symbol(symbol: &str) -> String {
    match symbol.split_once(':') {
        Some((pair, _settle)) if pair.contains('/') => pair.to_string(),
        Some((base, quote)) => format!("{base}/{quote}"),
        None => symbol.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct RateNormalizer {
    slash_tag: String,
    colon_tag: String,
    display_offset: FixedOffset,
}

impl RateNormalizer {
    pub fn new(reference_currency: &str, display_offset: FixedOffset) -> Self {
        let currency = reference_currency.to_uppercase();
        Self {
            slash_tag: format!("/{currency}"),
            colon_tag: format!(":{currency}"),
            display_offset,
        }
    }

    /// Substring match on either notation. Can misfire on symbols that
    /// merely contain the currency code.
    pub fn is_reference_instrument(&self, symbol: &str) -> bool {
        symbol.contains(&self.slash_tag) || symbol.contains(&self.colon_tag)
    }

    pub fn normalize(
        &self,
        quote: &RawQuote,
        policy: &SettlementPolicy,
        now_ms: i64,
    ) -> Option<CanonicalQuote> {
        if !self.is_reference_instrument(&quote.symbol) || !quote.rate.is_finite() {
            return None;
        }

        Some(CanonicalQuote {
            exchange: quote.exchange,
            symbol: canonical_symbol(&quote.symbol),
            rate: quote.rate,
            next_funding_ms: policy.resolve(quote, now_ms),
        })
    }

    /// `HH:MM:SS` in the display offset. `None` when there is nothing to show.
    pub fn format_settlement(&self, ms: Option<i64>) -> Option<String> {
        let utc = DateTime::from_timestamp_millis(ms?)?;
        Some(
            utc.with_timezone(&self.display_offset)
                .format("%H:%M:%S")
                .to_string(),
        )
    }
}
