mod aggregator;
mod api;
mod config;
mod errors;
mod exchanges;
mod models;
mod normalize;
mod scheduler;
mod snapshot;

use api::{ApiServer, AppState};
use config::Config;
use exchanges::ExchangeRegistry;
use normalize::RateNormalizer;
use scheduler::RefreshScheduler;
use snapshot::SnapshotStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_json);

    tracing::info!(
        "Funding radar starting, exchanges: {:?}, reference: {} on port {}",
        config.exchanges,
        config.reference_exchange,
        config.api_port
    );

    let store = SnapshotStore::new(config.exchanges.clone());

    // ── 1. HTTP facade (installs the metrics recorder first) ──────
    let server = ApiServer::new(AppState::new(store.clone(), &config));

    // ── 2. Background refresh loop ────────────────────────────────
    if config.local_refresh {
        let registry = ExchangeRegistry::from_config(&config)?;
        let normalizer = RateNormalizer::new(&config.reference_currency, config.display_offset);

        let scheduler = RefreshScheduler::new(
            registry,
            normalizer,
            config.reference_exchange.clone(),
            store,
            config.refresh_interval,
        );
        scheduler.start();
    } else {
        tracing::info!("local refresh disabled, waiting for pushed snapshots");
        if config.ingest_secret.is_none() {
            tracing::warn!("INGEST_SECRET is not set, the snapshot will never be populated");
        }
    }

    // ── 3. Serve until Ctrl+C ─────────────────────────────────────
    server.run(config.api_port).await
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
