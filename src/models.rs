use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shown in place of a settlement time an exchange did not report.
pub const NO_DATA: &str = "N/A";

/// One exchange's funding quote exactly as the connector produced it.
/// Lives for a single refresh cycle.
#[derive(Debug, Clone)]
pub struct RawQuote {
    pub exchange: &'static str,
    pub symbol: String,
    pub rate: f64,
    /// Candidate settlement fields keyed by the name the exchange used.
    pub timestamps: BTreeMap<String, i64>,
    /// Raw exchange payload, probed by quirk hooks for nested fields.
    pub info: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalQuote {
    pub exchange: &'static str,
    pub symbol: String,
    pub rate: f64,
    pub next_funding_ms: Option<i64>,
}

/// Per-exchange cell of an aggregated record. `None` means "no data",
/// never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeFunding {
    pub rate: Option<f64>,
    #[serde(default, with = "display_time")]
    pub next_funding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRecord {
    pub symbol: String,
    pub exchanges: BTreeMap<String, ExchangeFunding>,
}

impl AggregatedRecord {
    pub fn rate(&self, exchange: &str) -> Option<f64> {
        self.exchanges.get(exchange).and_then(|f| f.rate)
    }
}

/// Serializes a missing display time as the `NO_DATA` sentinel and reads the
/// sentinel (or null) back as `None`.
mod display_time {
    use super::NO_DATA;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(value.as_deref().unwrap_or(NO_DATA))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.filter(|s| s != NO_DATA && !s.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_time_serializes_as_sentinel_and_reads_back_as_none() {
        let cell = ExchangeFunding {
            rate: None,
            next_funding: None,
        };
        let json = serde_json::to_value(&cell).unwrap();
        assert_eq!(json["rate"], serde_json::Value::Null);
        assert_eq!(json["next_funding"], NO_DATA);

        let back: ExchangeFunding = serde_json::from_value(json).unwrap();
        assert_eq!(back, cell);
    }

    #[test]
    fn pushed_cell_may_omit_time() {
        let cell: ExchangeFunding = serde_json::from_str(r#"{"rate": 0.0001}"#).unwrap();
        assert_eq!(cell.rate, Some(0.0001));
        assert_eq!(cell.next_funding, None);
    }
}
