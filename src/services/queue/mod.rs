use async_trait::async_trait;
use std::time::Duration;

use crate::models::message::QueueMessage;

pub mod redis;
pub mod sqs;

pub use self::redis::RedisQueue;
pub use self::sqs::SqsQueue;

/// At-least-once message queue with per-delivery acknowledgement.
///
/// A received message stays invisible to other consumers until it is
/// acknowledged or its visibility timeout lapses; the timeout is owned by
/// the queue, never by the caller.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Long-poll for at most one message, waiting up to `wait`.
    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError>;

    /// Delete the delivered message. Returns `false` when the receipt is no
    /// longer valid (already used or expired).
    async fn acknowledge(&self, receipt: &str) -> Result<bool, QueueError>;

    /// Approximate number of messages waiting to be received.
    async fn depth(&self) -> Result<u64, QueueError>;
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("SQS error: {0}")]
    Sqs(String),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue returned an unusable message: {0}")]
    Malformed(String),
}
