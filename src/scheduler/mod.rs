use crate::aggregator::Aggregator;
use crate::errors::RefreshError;
use crate::exchanges::ExchangeRegistry;
use crate::models::AggregatedRecord;
use crate::normalize::RateNormalizer;
use crate::snapshot::{SnapshotStatus, SnapshotStore};
use chrono::Utc;
use futures_util::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Background poll loop: fetch every exchange, aggregate, publish.
pub struct RefreshScheduler {
    registry: ExchangeRegistry,
    normalizer: RateNormalizer,
    aggregator: Aggregator,
    store: SnapshotStore,
    interval: Duration,
    started: AtomicBool,
}

impl RefreshScheduler {
    pub fn new(
        registry: ExchangeRegistry,
        normalizer: RateNormalizer,
        reference_exchange: String,
        store: SnapshotStore,
        interval: Duration,
    ) -> Arc<Self> {
        let exchanges = registry.names().into_iter().map(String::from).collect();
        let aggregator = Aggregator::new(exchanges, reference_exchange, normalizer.clone());

        Arc::new(Self {
            registry,
            normalizer,
            aggregator,
            store,
            interval,
            started: AtomicBool::new(false),
        })
    }

    /// Spawns the refresh loop. Only the first call starts it; later calls
    /// return `None` so two loops never race on the store.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("refresh loop already running, ignoring start");
            return None;
        }

        tracing::info!(
            "refresh loop starting: {:?} every {:?}",
            self.registry.names(),
            self.interval
        );

        let scheduler = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                scheduler.refresh_once().await;
                // fixed pause after each cycle, however long the cycle took
                tokio::time::sleep(scheduler.interval).await;
            }
        }))
    }

    /// Runs one cycle and publishes its outcome. The cycle runs on its own
    /// task so a panic while normalizing or aggregating surfaces as an
    /// error status instead of killing the loop.
    pub async fn refresh_once(self: &Arc<Self>) -> SnapshotStatus {
        let scheduler = Arc::clone(self);
        let cycle = tokio::spawn(async move { scheduler.run_cycle().await })
            .await
            .map_err(RefreshError::Cycle);

        let status = match cycle {
            Ok(records) if records.is_empty() => {
                tracing::warn!("refresh produced no records, keeping previous snapshot");
                self.store.mark_empty();
                SnapshotStatus::Empty
            }
            Ok(records) => {
                tracing::info!("refresh published {} records", records.len());
                metrics::gauge!("funding_snapshot_records").set(records.len() as f64);
                self.store
                    .publish(records, self.aggregator.exchanges().to_vec(), Utc::now());
                SnapshotStatus::Updated
            }
            Err(e) => {
                tracing::error!("refresh cycle failed: {e}");
                self.store.mark_error(e.to_string());
                SnapshotStatus::Error
            }
        };

        let outcome = match status {
            SnapshotStatus::Updated => "updated",
            SnapshotStatus::Empty => "empty",
            _ => "error",
        };
        metrics::counter!("funding_refresh_cycles_total", "outcome" => outcome).increment(1);

        status
    }

    /// One task per exchange, then a full barrier before aggregation. An
    /// exchange whose task panicked contributes nothing.
    pub async fn run_cycle(&self) -> Vec<AggregatedRecord> {
        let tasks: Vec<_> = self
            .registry
            .iter()
            .map(|exchange| {
                let exchange = Arc::clone(exchange);
                tokio::spawn(async move { exchange.fetch().await })
            })
            .collect();

        let results = join_all(tasks).await;
        let now_ms = Utc::now().timestamp_millis();

        let mut quotes = Vec::new();
        for (exchange, result) in self.registry.iter().zip(results) {
            let name = exchange.name();
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!("[{name}] fetch task did not complete: {e}");
                    metrics::counter!("funding_exchange_failures_total", "exchange" => name)
                        .increment(1);
                    continue;
                }
            };

            let before = quotes.len();
            quotes.extend(
                raw.iter()
                    .filter_map(|q| self.normalizer.normalize(q, exchange.settlement(), now_ms)),
            );
            tracing::debug!("[{name}] {} quotes, {} kept", raw.len(), quotes.len() - before);
        }

        self.aggregator.aggregate(quotes)
    }
}
