use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::models::job::JobRequest;

const QUEUE_KEY: &str = "model3d:jobs";
const PROCESSING_KEY: &str = "model3d:processing";
const FAILED_KEY: &str = "model3d:failed";

/// Job message serialized into Redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    #[serde(flatten)]
    pub request: JobRequest,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn new(request: JobRequest) -> Self {
        Self {
            request,
            enqueued_at: Utc::now(),
        }
    }
}

/// A dequeued message. Keeps the raw payload so it can be removed from the
/// processing list exactly as it was stored.
#[derive(Debug)]
pub struct Delivery {
    pub job: Result<QueuedJob, String>,
    raw: String,
}

impl Delivery {
    fn parse(raw: String) -> Self {
        let job = serde_json::from_str(&raw).map_err(|e| e.to_string());
        Self { job, raw }
    }

    /// Job id of a message whose payload failed to decode, if the envelope has one.
    pub fn envelope_job_id(&self) -> Option<String> {
        let envelope: serde_json::Value = serde_json::from_str(&self.raw).ok()?;
        envelope
            .get("job_id")?
            .as_str()
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
    }
}

/// Entry pushed to the dead-letter list.
#[derive(Debug, Serialize, Deserialize)]
pub struct FailedJob {
    pub payload: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Redis-backed job queue with a processing list and a dead-letter list.
pub struct JobQueue {
    client: redis::Client,
}

impl JobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Enqueue a generation job.
    pub async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Move the oldest job onto the processing list and return it.
    pub async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        Ok(result.map(Delivery::parse))
    }

    /// Check Redis connectivity (for readiness checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current queue depth (pending jobs).
    pub async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Mark a job as done (remove from the processing list).
    pub async fn complete(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &delivery.raw)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Move a job from the processing list to the dead-letter list.
    pub async fn fail(&self, delivery: &Delivery, error: &str) -> Result<(), QueueError> {
        let entry = FailedJob {
            payload: delivery.raw.clone(),
            error: error.to_string(),
            failed_at: Utc::now(),
        };
        let entry = serde_json::to_string(&entry).map_err(QueueError::Serialize)?;

        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::pipe()
            .atomic()
            .lpush(FAILED_KEY, &entry)
            .ignore()
            .lrem(PROCESSING_KEY, 1, &delivery.raw)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
