use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::{JobPayload, JobRequest, JobStatus};
use crate::services::queue::QueuedJob;

/// Body of `POST /api/v1/jobs`: the job payload plus an optional caller-chosen id.
#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub job_id: Option<String>,
    #[serde(flatten)]
    pub payload: JobPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl SubmitJobRequest {
    pub fn into_job(self) -> JobRequest {
        let job_id = self
            .job_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        JobRequest::new(job_id, self.payload)
    }
}

/// POST /api/v1/jobs: validate and enqueue a model generation job.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), (StatusCode, Json<ErrorResponse>)> {
    let job = body.into_job();

    job.check().map_err(|error| (StatusCode::UNPROCESSABLE_ENTITY, Json(ErrorResponse { error })))?;

    state.queue.enqueue(&QueuedJob::new(job.clone())).await.map_err(|e| {
        tracing::error!(job_id = %job.job_id, error = %e, "Failed to enqueue job");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Job queue unavailable".to_string(),
            }),
        )
    })?;

    tracing::info!(job_id = %job.job_id, shop = %job.payload.shop, "Job enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: job.job_id,
            status: JobStatus::Pending,
        }),
    ))
}
