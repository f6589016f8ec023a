//! Notification bodies used across the dispatcher tests

#![allow(dead_code)]

use transcode_dispatch::models::message::QueueMessage;

/// The test event S3 publishes when a notification target is configured.
pub const HEALTH_CHECK_BODY: &str = r#"{"Service":"S3","Event":"s3:TestEvent"}"#;

pub const EMPTY_RECORDS_BODY: &str = r#"{"Records":[]}"#;

pub const OUTPUT_BUCKET: &str = "out";

/// An `ObjectCreated:Put` notification for the given (bucket, key) pairs,
/// shaped like the real thing.
pub fn upload_body(objects: &[(&str, &str)]) -> String {
    let records: Vec<_> = objects
        .iter()
        .map(|(bucket, key)| {
            serde_json::json!({
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "awsRegion": "us-east-1",
                "eventTime": "2026-10-19T09:00:00.000Z",
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "s3SchemaVersion": "1.0",
                    "bucket": { "name": bucket, "arn": format!("arn:aws:s3:::{}", bucket) },
                    "object": { "key": key, "size": 1048576, "eTag": "d41d8cd98f00b204e9800998ecf8427e" }
                }
            })
        })
        .collect();
    serde_json::json!({ "Records": records }).to_string()
}

pub fn message(id: &str, body: impl Into<String>) -> QueueMessage {
    QueueMessage {
        id: id.to_string(),
        receipt: format!("receipt-{}", id),
        body: body.into(),
        receive_count: Some(1),
    }
}
