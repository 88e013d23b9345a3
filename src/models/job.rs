use garde::Validate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Status of a model generation job as seen by the system of record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Named tier controlling the reconstruction mesh resolution.
///
/// Deserialization is lenient: unknown names fall back to [`QualityPreset::Balanced`].
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case", from = "String")]
#[strum(serialize_all = "snake_case")]
pub enum QualityPreset {
    Fast,
    #[default]
    Balanced,
    Quality,
}

impl QualityPreset {
    /// Parse a preset name, defaulting to `balanced` for anything unrecognized.
    pub fn from_name(name: &str) -> Self {
        name.trim().to_ascii_lowercase().parse().unwrap_or_default()
    }

    /// Marching-cubes resolution used by the reconstruction model.
    pub fn mesh_resolution(self) -> u32 {
        match self {
            QualityPreset::Fast => 128,
            QualityPreset::Balanced => 192,
            QualityPreset::Quality => 256,
        }
    }
}

impl From<String> for QualityPreset {
    fn from(name: String) -> Self {
        QualityPreset::from_name(&name)
    }
}

/// Resolution for a raw preset name; unknown names resolve like `balanced`.
pub fn mesh_resolution_for(name: &str) -> u32 {
    QualityPreset::from_name(name).mesh_resolution()
}

/// Product data carried by a queued job.
///
/// Required string fields default to empty on the wire so that a message with
/// missing fields still reaches validation and gets a `failed` report.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobPayload {
    #[garde(length(min = 1, max = 255), custom(not_blank))]
    #[serde(default, deserialize_with = "null_as_default")]
    pub shop: String,

    #[garde(length(min = 1, max = 255), custom(has_identifier))]
    #[serde(default, deserialize_with = "null_as_default")]
    pub product_id: String,

    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_handle: Option<String>,

    #[garde(custom(optional_identifier))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,

    #[garde(length(min = 1), inner(length(min = 1)))]
    #[serde(default, deserialize_with = "null_as_default")]
    pub image_urls: Vec<String>,

    #[garde(skip)]
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Map<String, Value>,

    #[garde(skip)]
    #[serde(default, deserialize_with = "null_as_default")]
    pub quality: QualityPreset,
}

/// Treat an explicit `null` like a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn not_blank(value: &str, _context: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("must not be blank"));
    }
    Ok(())
}

/// The last `/` segment names the object in storage, so it must be non-blank.
fn has_identifier(value: &str, context: &()) -> garde::Result {
    not_blank(value, context)?;
    if value.rsplit('/').next().unwrap_or_default().trim().is_empty() {
        return Err(garde::Error::new("must end with an identifier segment"));
    }
    Ok(())
}

fn optional_identifier(value: &Option<String>, context: &()) -> garde::Result {
    match value.as_deref() {
        Some(id) if !id.is_empty() => has_identifier(id, context),
        _ => Ok(()),
    }
}

/// One end-to-end request to turn source images into a published 3D asset.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobRequest {
    #[garde(length(min = 1))]
    pub job_id: String,

    #[garde(dive)]
    pub payload: JobPayload,
}

impl JobRequest {
    pub fn new(job_id: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            job_id: job_id.into(),
            payload,
        }
    }

    /// Check required fields, flattening the garde report into one message.
    pub fn check(&self) -> Result<(), String> {
        self.validate().map_err(|report| report.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> JobPayload {
        JobPayload {
            shop: "acme.test".to_string(),
            product_id: "gid://shopify/Product/123".to_string(),
            product_handle: None,
            variant_id: None,
            image_urls: vec!["https://x/a.png".to_string()],
            metadata: Map::new(),
            quality: QualityPreset::Fast,
        }
    }

    #[test]
    fn test_quality_resolution_table() {
        assert_eq!(mesh_resolution_for("fast"), 128);
        assert_eq!(mesh_resolution_for("balanced"), 192);
        assert_eq!(mesh_resolution_for("quality"), 256);
        assert_eq!(mesh_resolution_for("ultra"), 192);
        assert_eq!(mesh_resolution_for(""), 192);
        assert_eq!(mesh_resolution_for(" Quality "), 256);
    }

    #[test]
    fn test_quality_deserializes_leniently() {
        let q: QualityPreset = serde_json::from_str("\"fast\"").unwrap();
        assert_eq!(q, QualityPreset::Fast);
        let q: QualityPreset = serde_json::from_str("\"cinematic\"").unwrap();
        assert_eq!(q, QualityPreset::Balanced);
        assert_eq!(serde_json::to_string(&QualityPreset::Quality).unwrap(), "\"quality\"");
    }

    #[test]
    fn test_payload_defaults() {
        let p: JobPayload = serde_json::from_value(serde_json::json!({
            "shop": "acme.test",
            "product_id": "1",
            "image_urls": ["https://x/a.png"]
        }))
        .unwrap();
        assert_eq!(p.quality, QualityPreset::Balanced);
        assert!(p.metadata.is_empty());
        assert!(p.variant_id.is_none());
    }

    #[test]
    fn test_valid_job_passes() {
        let job = JobRequest::new("job-1", payload());
        assert!(job.check().is_ok());
    }

    #[test]
    fn test_missing_fields_rejected() {
        let mut p = payload();
        p.shop.clear();
        assert!(JobRequest::new("job-1", p).check().is_err());

        let mut p = payload();
        p.image_urls.clear();
        let err = JobRequest::new("job-1", p).check().unwrap_err();
        assert!(err.contains("image_urls"));

        let mut p = payload();
        p.image_urls = vec![String::new()];
        assert!(JobRequest::new("job-1", p).check().is_err());

        assert!(JobRequest::new("", payload()).check().is_err());
    }

    #[test]
    fn test_missing_keys_still_deserialize() {
        let job: JobRequest = serde_json::from_value(serde_json::json!({
            "job_id": "job-2",
            "payload": {}
        }))
        .unwrap();
        assert!(job.check().is_err());
    }

    #[test]
    fn test_null_optional_fields_use_defaults() {
        let job: JobRequest = serde_json::from_value(serde_json::json!({
            "job_id": "job-3",
            "payload": {
                "shop": "acme.test",
                "product_id": "1",
                "product_handle": null,
                "variant_id": null,
                "image_urls": ["https://x/a.png"],
                "metadata": null,
                "quality": null
            }
        }))
        .unwrap();
        assert_eq!(job.payload.quality, QualityPreset::Balanced);
        assert!(job.payload.metadata.is_empty());
        assert!(job.check().is_ok());

        let job: JobRequest = serde_json::from_value(serde_json::json!({
            "job_id": "job-4",
            "payload": {"shop": null, "product_id": "1", "image_urls": null}
        }))
        .unwrap();
        assert!(job.check().is_err());
    }

    #[test]
    fn test_blank_identifiers_rejected() {
        let mut p = payload();
        p.shop = "   ".to_string();
        assert!(JobRequest::new("job-1", p).check().is_err());

        let mut p = payload();
        p.product_id = "gid://shopify/Product/".to_string();
        let err = JobRequest::new("job-1", p).check().unwrap_err();
        assert!(err.contains("product_id"));

        let mut p = payload();
        p.variant_id = Some("gid://shopify/ProductVariant/".to_string());
        assert!(JobRequest::new("job-1", p).check().is_err());

        let mut p = payload();
        p.variant_id = Some(String::new());
        assert!(JobRequest::new("job-1", p).check().is_ok());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert_eq!(JobStatus::Processing.to_string(), "processing");
    }
}
