use axum::{
    routing::{delete, get, patch, post},
    Router,
};

pub mod events;
pub mod jobs;
pub mod system;

/// Router for everything under `/api`.
pub fn router() -> Router {
    Router::new()
        .route("/job/create", post(jobs::create_job))
        .route("/job/update", patch(jobs::update_job))
        .route("/job/download", get(jobs::download_job))
        .route("/job/status", get(jobs::job_status))
        .route("/job/list", get(jobs::list_jobs))
        .route("/jobs", delete(jobs::delete_completed_jobs))
        .route("/subscribe", get(events::subscribe))
}

/// Run a store-bound call off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, axum::response::Response>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        tracing::error!(error = %e, "blocking task failed");
        crate::app::errors::json_error(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal error",
        )
    })
}
