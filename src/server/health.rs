//! Liveness probe.

use axum::http::StatusCode;

/// `GET /health`: `200 OK` while the server is accepting connections.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
