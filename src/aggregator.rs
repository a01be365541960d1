use crate::models::{AggregatedRecord, CanonicalQuote, ExchangeFunding};
use crate::normalize::RateNormalizer;
use ordered_float::OrderedFloat;
use std::collections::BTreeMap;

/// Merges one cycle's canonical quotes into one record per symbol.
pub struct Aggregator {
    exchanges: Vec<String>,
    reference: String,
    normalizer: RateNormalizer,
}

impl Aggregator {
    pub fn new(exchanges: Vec<String>, reference: String, normalizer: RateNormalizer) -> Self {
        Self {
            exchanges,
            reference,
            normalizer,
        }
    }

    pub fn exchanges(&self) -> &[String] {
        &self.exchanges
    }

    /// Every configured exchange gets a cell on every record, empty unless
    /// it quoted that symbol. A repeated (exchange, symbol) pair keeps the
    /// last quote.
    pub fn aggregate(&self, quotes: Vec<CanonicalQuote>) -> Vec<AggregatedRecord> {
        let mut by_symbol: BTreeMap<String, AggregatedRecord> = BTreeMap::new();

        for quote in quotes {
            let record = by_symbol
                .entry(quote.symbol.clone())
                .or_insert_with(|| AggregatedRecord {
                    symbol: quote.symbol.clone(),
                    exchanges: self
                        .exchanges
                        .iter()
                        .map(|e| (e.clone(), ExchangeFunding::default()))
                        .collect(),
                });

            record.exchanges.insert(
                quote.exchange.to_string(),
                ExchangeFunding {
                    rate: Some(quote.rate),
                    next_funding: self.normalizer.format_settlement(quote.next_funding_ms),
                },
            );
        }

        let mut records: Vec<_> = by_symbol.into_values().collect();
        sort_by_reference(&mut records, &self.reference);
        records
    }
}

/// Ascending by the reference exchange's rate, records without one last,
/// ties broken by symbol.
pub fn sort_by_reference(records: &mut [AggregatedRecord], reference: &str) {
    records.sort_by(|a, b| {
        let key = |r: &AggregatedRecord| {
            let rate = r.rate(reference);
            (rate.is_none(), OrderedFloat(rate.unwrap_or(f64::INFINITY)))
        };
        key(a).cmp(&key(b)).then_with(|| a.symbol.cmp(&b.symbol))
    });
}
