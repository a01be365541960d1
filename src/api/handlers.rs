use super::AppState;
use super::error::ApiError;
use super::models::{FundingResponse, PushPayload, PushResponse};
use crate::snapshot::SnapshotStatus;
use axum::{
    extract::{State, rejection::JsonRejection},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use std::collections::BTreeSet;

/// GET /health: simple liveness check
pub async fn health() -> &'static str {
    "OK"
}

/// GET /api/funding: the latest published snapshot, never waiting on a refresh
pub async fn get_funding(State(state): State<AppState>) -> Response {
    let snapshot = state.store.current();
    Json(FundingResponse::new(&snapshot, &state.reference_exchange)).into_response()
}

/// POST /api/funding/push: replace the snapshot with a remotely aggregated one
pub async fn push_funding(
    State(state): State<AppState>,
    payload: Result<Json<PushPayload>, JsonRejection>,
) -> Result<Json<PushResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    if payload.records.is_empty() {
        tracing::warn!("pushed snapshot has no records, keeping previous snapshot");
        state.store.mark_empty();
        return Ok(Json(PushResponse {
            status: SnapshotStatus::Empty,
            count: 0,
        }));
    }

    let exchanges = payload.exchanges.unwrap_or_else(|| {
        payload
            .records
            .iter()
            .flat_map(|r| r.exchanges.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    });

    let count = payload.records.len();
    state.store.publish(
        payload.records,
        exchanges,
        payload.generated_at.unwrap_or_else(Utc::now),
    );
    tracing::info!("pushed snapshot published with {count} records");

    Ok(Json(PushResponse {
        status: SnapshotStatus::Updated,
        count,
    }))
}
