//! Request/response bodies.

use serde::{Deserialize, Serialize};

use scanqueue_core::JobId;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    #[serde(alias = "args")]
    pub arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub id: JobId,
}

#[derive(Debug, Deserialize)]
pub struct UpdateJobRequest {
    pub id: String,
    pub status: String,
    /// Failure detail when `status` is `Failed`.
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub task: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdQuery {
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteJobsResponse {
    pub deleted: Vec<JobId>,
}
