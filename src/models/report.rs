use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::job::JobStatus;

/// Pipeline point at which a progress report is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Checkpoint {
    Received,
    PreprocessingStarted,
    PreprocessingDone,
    GenerationStarted,
    GenerationDone,
    UploadStarted,
    UploadDone,
    Completed,
}

impl Checkpoint {
    pub fn progress(self) -> u8 {
        match self {
            Checkpoint::Received => 5,
            Checkpoint::PreprocessingStarted => 10,
            Checkpoint::PreprocessingDone => 40,
            Checkpoint::GenerationStarted => 50,
            Checkpoint::GenerationDone => 80,
            Checkpoint::UploadStarted => 85,
            Checkpoint::UploadDone => 95,
            Checkpoint::Completed => 100,
        }
    }
}

/// Payload posted to the status webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl StatusReport {
    pub fn processing(job_id: &str, checkpoint: Checkpoint) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Processing,
            model_url: None,
            error_message: None,
            metadata: None,
            progress: Some(checkpoint.progress()),
        }
    }

    pub fn completed(job_id: &str, model_url: String, metadata: Map<String, Value>) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Completed,
            model_url: Some(model_url),
            error_message: None,
            metadata: Some(metadata),
            progress: Some(Checkpoint::Completed.progress()),
        }
    }

    pub fn failed(job_id: &str, error_message: String, metadata: Map<String, Value>) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Failed,
            model_url: None,
            error_message: Some(error_message),
            metadata: Some(metadata),
            progress: None,
        }
    }
}
