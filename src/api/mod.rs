pub mod auth;
pub mod error;
pub mod handlers;
pub mod models;
pub mod router;

use crate::config::Config;
use crate::snapshot::SnapshotStore;
use axum::Router;
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use std::net::SocketAddr;
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: SnapshotStore,
    pub reference_exchange: Arc<str>,
    pub ingest_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(store: SnapshotStore, config: &Config) -> Self {
        Self {
            store,
            reference_exchange: Arc::from(config.reference_exchange.as_str()),
            ingest_secret: config.ingest_secret.as_deref().map(Arc::from),
        }
    }
}

pub struct ApiServer {
    app: Router,
}

impl ApiServer {
    /// Builds the router and installs the Prometheus recorder, so metrics
    /// emitted after this call are exported on /metrics.
    pub fn new(state: AppState) -> Self {
        let (metrics_layer, metrics_handle) = PrometheusMetricLayer::pair();

        let app = router::build(state)
            .route("/metrics", get(|| async move { metrics_handle.render() }))
            .layer(metrics_layer);

        Self { app }
    }

    /// Binds the server to the configured port and serves until Ctrl+C.
    pub async fn run(self, port: u16) -> anyhow::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("API server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down...");
}
