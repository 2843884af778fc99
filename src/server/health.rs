//! Liveness endpoint.

use axum::http::StatusCode;

/// Returns 200 while the process is up. No dependency checks; a wedged
/// database surfaces through delivery failures, not liveness.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
