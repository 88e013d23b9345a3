use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::models::report::StatusReport;

pub const WEBHOOK_PATH: &str = "/api/models/webhook/update";

/// Delivers status reports to the external system of record.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, report: &StatusReport) -> Result<(), ReportingError>;
}

/// Posts reports to the backend's model webhook.
pub struct WebhookReporter {
    http: Client,
    endpoint: String,
}

impl WebhookReporter {
    pub fn new(backend_url: &str, timeout: Duration) -> Result<Self, ReportingError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ReportingError::Http)?;

        Ok(Self {
            http,
            endpoint: format!("{}{}", backend_url.trim_end_matches('/'), WEBHOOK_PATH),
        })
    }
}

#[async_trait]
impl StatusReporter for WebhookReporter {
    async fn report(&self, report: &StatusReport) -> Result<(), ReportingError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(report)
            .send()
            .await
            .map_err(ReportingError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReportingError::Status(status.as_u16()));
        }

        tracing::debug!(
            job_id = %report.job_id,
            status = %report.status,
            progress = ?report.progress,
            "Status report delivered"
        );
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportingError {
    #[error("Status webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Status webhook returned HTTP {0}")]
    Status(u16),
}
