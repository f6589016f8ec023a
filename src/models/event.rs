use garde::Validate;
use serde::{Deserialize, Serialize};

/// Event name carried by the synthetic notification S3 sends when a
/// bucket notification target is first configured.
pub const TEST_EVENT_NAME: &str = "s3:TestEvent";

/// A single uploaded object referenced by an upload notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct UploadRecord {
    #[garde(length(min = 1, max = 255))]
    pub bucket: String,

    /// Object key, already URL-decoded.
    #[garde(length(min = 1, max = 1024))]
    pub key: String,
}

impl UploadRecord {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Parsed body of an upload notification message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// Wiring check; acknowledged without dispatching anything.
    HealthCheck { service: String },
    /// Zero or more uploaded objects, in notification order.
    Uploads(Vec<UploadRecord>),
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "Service")]
    service: Option<String>,
    #[serde(rename = "Event")]
    event: Option<String>,
    #[serde(rename = "Records")]
    records: Option<Vec<RawRecord>>,
}

#[derive(Deserialize)]
struct RawRecord {
    s3: RawS3Entity,
}

#[derive(Deserialize)]
struct RawS3Entity {
    bucket: RawBucket,
    object: RawObject,
}

#[derive(Deserialize)]
struct RawBucket {
    name: String,
}

#[derive(Deserialize)]
struct RawObject {
    key: String,
}

impl UploadEvent {
    /// Parse a notification body.
    ///
    /// Anything that is neither a test event nor carries a `Records` array is
    /// rejected. Every record is decoded and validated; one bad record fails
    /// the whole body.
    pub fn parse(body: &str) -> Result<Self, EventError> {
        let raw: RawEvent = serde_json::from_str(body).map_err(EventError::Json)?;

        if let (Some(service), Some(event)) = (&raw.service, &raw.event) {
            if event == TEST_EVENT_NAME {
                return Ok(UploadEvent::HealthCheck {
                    service: service.clone(),
                });
            }
        }

        let records = raw.records.ok_or(EventError::MissingRecords)?;
        let mut parsed = Vec::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            let upload = UploadRecord {
                bucket: record.s3.bucket.name,
                key: decode_object_key(&record.s3.object.key)?,
            };
            upload
                .validate()
                .map_err(|e| EventError::InvalidRecord {
                    index,
                    reason: e.to_string(),
                })?;
            parsed.push(upload);
        }

        Ok(UploadEvent::Uploads(parsed))
    }

    /// Records to dispatch; a health check carries none.
    pub fn records(&self) -> &[UploadRecord] {
        match self {
            UploadEvent::HealthCheck { .. } => &[],
            UploadEvent::Uploads(records) => records,
        }
    }
}

/// Notification keys are form-encoded: spaces arrive as `+`, everything
/// else reserved as `%XX`.
pub fn decode_object_key(raw: &str) -> Result<String, EventError> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|_| EventError::KeyEncoding(raw.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Message body is not valid event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event has no Records array and is not a test event")]
    MissingRecords,

    #[error("Object key is not valid URL-encoded UTF-8: {0}")]
    KeyEncoding(String),

    #[error("Record {index} is invalid: {reason}")]
    InvalidRecord { index: usize, reason: String },
}
