use super::AppState;
use super::error::ApiError;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

pub const INGEST_SECRET_HEADER: &str = "x-ingest-secret";

/// Guards the push endpoint: the request must carry the configured shared
/// secret. With no secret configured, pushing is refused outright.
pub async fn require_ingest_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(secret) = state.ingest_secret.as_deref() else {
        return Err(ApiError::PushDisabled);
    };

    let provided = request
        .headers()
        .get(INGEST_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !constant_time_eq(provided.as_bytes(), secret.as_bytes()) {
        tracing::warn!("rejected push with missing or wrong secret");
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::constant_time_eq;

    #[test]
    fn compares_exactly() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(!constant_time_eq(b"", b"secret"));
    }
}
