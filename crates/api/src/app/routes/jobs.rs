use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

use scanqueue_core::{JobId, JobStatus, StatusKind, Task};

use crate::app::routes::blocking;
use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// POST /api/job/create
pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateJobRequest>,
) -> axum::response::Response {
    let submissions = services.submissions.clone();
    let submitted = match blocking(move || submissions.submit(&body.arguments)).await {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match submitted {
        Ok(id) => (StatusCode::OK, Json(dto::CreateJobResponse { id })).into_response(),
        Err(e) => errors::submit_error_to_response(e),
    }
}

/// PATCH /api/job/update
///
/// Body: `{"id", "status", "reason"?, "task"?}`. `task` defaults to `update`.
pub async fn update_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::UpdateJobRequest>,
) -> axum::response::Response {
    let id: JobId = match body.id.parse() {
        Ok(v) => v,
        Err(e) => return errors::bad_request(e),
    };
    let kind: StatusKind = match body.status.parse() {
        Ok(v) => v,
        Err(e) => return errors::bad_request(e),
    };
    let task = match body.task.as_deref().map(str::parse::<Task>).transpose() {
        Ok(t) => t.unwrap_or(Task::Update),
        Err(e) => return errors::bad_request(e),
    };
    let status = JobStatus::from_parts(kind, body.reason);

    let jobs = services.jobs.clone();
    match blocking(move || jobs.update(id, status, task)).await {
        Ok(Ok(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(Err(e)) => errors::update_error_to_response(e),
        Err(resp) => resp,
    }
}

/// GET /api/job/download?id=
///
/// The XML artifact of a completed job; 404 until then.
pub async fn download_job(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::IdQuery>,
) -> axum::response::Response {
    let id: JobId = match query.id.parse() {
        Ok(v) => v,
        Err(e) => return errors::bad_request(e),
    };

    let jobs = services.jobs.clone();
    match blocking(move || jobs.download(id)).await {
        Ok(Ok(Some(download))) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/xml".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", download.file_name),
                ),
            ],
            download.contents,
        )
            .into_response(),
        Ok(Ok(None)) => errors::not_found(format!("no artifact for job {id}")),
        Ok(Err(e)) => errors::query_error_to_response(e),
        Err(resp) => resp,
    }
}

/// GET /api/job/status?id=
pub async fn job_status(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::IdQuery>,
) -> axum::response::Response {
    let id: JobId = match query.id.parse() {
        Ok(v) => v,
        Err(e) => return errors::bad_request(e),
    };

    let jobs = services.jobs.clone();
    match blocking(move || jobs.get(id)).await {
        Ok(Ok(Some(record))) => (StatusCode::OK, Json(record)).into_response(),
        Ok(Ok(None)) => errors::not_found(format!("job {id} not found")),
        Ok(Err(e)) => errors::store_error_to_response(e),
        Err(resp) => resp,
    }
}

/// GET /api/job/list?status=
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    let filter = match query.status.as_deref().map(str::parse::<StatusKind>).transpose() {
        Ok(f) => f,
        Err(e) => return errors::bad_request(e),
    };

    let jobs = services.jobs.clone();
    match blocking(move || jobs.list(filter)).await {
        Ok(Ok(records)) => (StatusCode::OK, Json(records)).into_response(),
        Ok(Err(e)) => errors::store_error_to_response(e),
        Err(resp) => resp,
    }
}

/// DELETE /api/jobs
///
/// Removes every completed job and its artifact.
pub async fn delete_completed_jobs(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    let jobs = services.jobs.clone();
    match blocking(move || jobs.delete_completed()).await {
        Ok(Ok(deleted)) => (StatusCode::OK, Json(dto::DeleteJobsResponse { deleted })).into_response(),
        Ok(Err(e)) => errors::store_error_to_response(e),
        Err(resp) => resp,
    }
}
