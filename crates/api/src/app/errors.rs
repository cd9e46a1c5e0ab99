use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tracing::error;

use scanqueue_core::{DomainError, ValidationError};
use scanqueue_infra::jobs::{QueryError, SubmitError, UpdateError};
use scanqueue_infra::status_store::StoreError;

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn validation_error_to_response(err: ValidationError) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, err.code(), err.to_string())
}

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    error!(error = %err, "status store error");
    json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", err.to_string())
}

pub fn submit_error_to_response(err: SubmitError) -> axum::response::Response {
    match err {
        SubmitError::Invalid(e) => validation_error_to_response(e),
        SubmitError::Store(e) => store_error_to_response(e),
        SubmitError::Enqueue { id, source } => (
            StatusCode::BAD_GATEWAY,
            axum::Json(json!({
                "error": "enqueue_failed",
                "message": source.to_string(),
                "id": id,
            })),
        )
            .into_response(),
    }
}

pub fn update_error_to_response(err: UpdateError) -> axum::response::Response {
    match err {
        UpdateError::NotFound(id) => not_found(format!("job {id} not found")),
        UpdateError::Transition(e @ DomainError::InvalidTransition { .. }) => {
            json_error(StatusCode::CONFLICT, "invalid_transition", e.to_string())
        }
        UpdateError::Transition(e) => json_error(StatusCode::BAD_REQUEST, "invalid_request", e.to_string()),
        UpdateError::Store(e) => store_error_to_response(e),
    }
}

pub fn query_error_to_response(err: QueryError) -> axum::response::Response {
    match err {
        QueryError::Store(e) => store_error_to_response(e),
        QueryError::Artifact(e) => {
            error!(error = %e, "artifact read failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "artifact_error", e.to_string())
        }
    }
}

pub fn not_found(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", message)
}

/// Bad identifiers, statuses or tasks in a request.
pub fn bad_request(err: DomainError) -> axum::response::Response {
    let code = match err {
        DomainError::InvalidId(_) => "invalid_id",
        _ => "invalid_request",
    };
    json_error(StatusCode::BAD_REQUEST, code, err.to_string())
}
