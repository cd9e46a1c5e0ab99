use axum::http::StatusCode;

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}
