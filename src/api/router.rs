use super::{AppState, auth, handlers};
use crate::api::error::ApiError;
use axum::Router;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use std::any::Any;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Builds and returns the full Axum router with all routes and shared state.
pub fn build(state: AppState) -> Router {
    let push = Router::new()
        .route("/api/funding/push", post(handlers::push_funding))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_ingest_secret,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/funding", get(handlers::get_funding))
        .merge(push)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn handle_panic(_err: Box<dyn Any + Send + 'static>) -> Response {
    tracing::error!("request handler panicked");
    ApiError::Internal.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::INGEST_SECRET_HEADER;
    use crate::models::{AggregatedRecord, ExchangeFunding};
    use crate::snapshot::SnapshotStore;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state(secret: Option<&str>) -> AppState {
        AppState {
            store: SnapshotStore::new(vec!["binance".into(), "bybit".into()]),
            reference_exchange: Arc::from("binance"),
            ingest_secret: secret.map(Arc::from),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn push_request(secret: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/funding/push")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header(INGEST_SECRET_HEADER, secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get_funding() -> Request<Body> {
        Request::builder()
            .uri("/api/funding")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = build(state(None))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn serves_initializing_snapshot_before_first_cycle() {
        let response = build(state(None)).oneshot(get_funding()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "initializing");
        assert_eq!(body["count"], 0);
        assert_eq!(body["records"], json!([]));
        assert_eq!(body["reference_exchange"], "binance");
        assert_eq!(body["exchanges"], json!(["binance", "bybit"]));
    }

    #[tokio::test]
    async fn serves_published_records_with_no_data_markers() {
        let state = state(None);
        state.store.publish(
            vec![AggregatedRecord {
                symbol: "BTC/USDT".into(),
                exchanges: BTreeMap::from([
                    (
                        "binance".to_string(),
                        ExchangeFunding {
                            rate: Some(0.0001),
                            next_funding: Some("08:00:00".into()),
                        },
                    ),
                    ("bybit".to_string(), ExchangeFunding::default()),
                ]),
            }],
            vec!["binance".into(), "bybit".into()],
            Utc::now(),
        );

        let body = body_json(build(state).oneshot(get_funding()).await.unwrap()).await;
        assert_eq!(body["status"], "updated");
        assert_eq!(body["count"], 1);

        let record = &body["records"][0];
        assert_eq!(record["symbol"], "BTC/USDT");
        assert_eq!(record["exchanges"]["binance"]["rate"], 0.0001);
        assert_eq!(record["exchanges"]["binance"]["next_funding"], "08:00:00");
        assert_eq!(record["exchanges"]["bybit"]["rate"], Value::Null);
        assert_eq!(record["exchanges"]["bybit"]["next_funding"], "N/A");
    }

    #[tokio::test]
    async fn push_is_forbidden_without_configured_secret() {
        let response = build(state(None))
            .oneshot(push_request(Some("anything"), json!({"records": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn push_with_wrong_secret_is_unauthorized() {
        let app = build(state(Some("s3cret")));

        let response = app
            .clone()
            .oneshot(push_request(Some("guess"), json!({"records": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(push_request(None, json!({"records": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "unauthorized");
    }

    #[tokio::test]
    async fn authorized_push_replaces_snapshot() {
        let state = state(Some("s3cret"));
        let app = build(state.clone());

        let payload = json!({
            "generated_at": "2024-01-01T00:00:00Z",
            "records": [
                {"symbol": "ETH/USDT", "exchanges": {
                    "okx": {"rate": -0.0003, "next_funding": "N/A"},
                    "binance": {"rate": 0.0002}
                }}
            ]
        });
        let response = app
            .clone()
            .oneshot(push_request(Some("s3cret"), payload))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack = body_json(response).await;
        assert_eq!(ack["status"], "updated");
        assert_eq!(ack["count"], 1);

        let snap = state.store.current();
        assert_eq!(snap.exchanges, vec!["binance", "okx"]);
        assert_eq!(snap.records[0].rate("okx"), Some(-0.0003));
        assert_eq!(snap.records[0].exchanges["okx"].next_funding, None);

        let body = body_json(app.oneshot(get_funding()).await.unwrap()).await;
        assert_eq!(body["generated_at"], "2024-01-01T00:00:00Z");
        assert_eq!(body["count"], 1);
    }

    #[tokio::test]
    async fn empty_push_keeps_previous_records() {
        let state = state(Some("s3cret"));
        let app = build(state.clone());

        let first = json!({"records": [{"symbol": "BTC/USDT", "exchanges": {"binance": {"rate": 0.0001}}}]});
        app.clone()
            .oneshot(push_request(Some("s3cret"), first))
            .await
            .unwrap();

        let response = app
            .oneshot(push_request(Some("s3cret"), json!({"records": []})))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["status"], "empty");

        let snap = state.store.current();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.records[0].symbol, "BTC/USDT");
    }

    #[tokio::test]
    async fn malformed_push_is_bad_request() {
        let response = build(state(Some("s3cret")))
            .oneshot(push_request(Some("s3cret"), json!({"rows": 3})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
