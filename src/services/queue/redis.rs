use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::MultiplexedConnection, AsyncCommands, Script};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::{MessageQueue, QueueError};
use crate::models::message::QueueMessage;

const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Moves expired in-flight deliveries back to the pending list, then claims
/// the next pending message under a fresh receipt.
///
/// KEYS: pending, inflight, receipts, deliveries
/// ARGV: now_ms, deadline_ms, receipt
const CLAIM_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, r in ipairs(expired) do
  local p = redis.call('HGET', KEYS[3], r)
  if p then redis.call('RPUSH', KEYS[1], p) end
  redis.call('HDEL', KEYS[3], r)
  redis.call('ZREM', KEYS[2], r)
end
local payload = redis.call('RPOP', KEYS[1])
if not payload then return false end
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[3])
redis.call('HSET', KEYS[3], ARGV[3], payload)
local id = cjson.decode(payload)['id']
local count = redis.call('HINCRBY', KEYS[4], id, 1)
return {payload, count}
"#;

/// Deletes a delivery if its receipt is still inside its visibility window.
///
/// KEYS: inflight, receipts, deliveries
/// ARGV: receipt, now_ms
const ACK_SCRIPT: &str = r#"
local deadline = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not deadline or tonumber(deadline) < tonumber(ARGV[2]) then return 0 end
local payload = redis.call('HGET', KEYS[2], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[1], ARGV[1])
if payload then
  redis.call('HDEL', KEYS[3], cjson.decode(payload)['id'])
end
return 1
"#;

/// Message envelope stored in Redis.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: String,
    body: String,
}

/// Redis-backed queue with SQS-style visibility timeouts, for running the
/// dispatcher without AWS.
pub struct RedisQueue {
    client: redis::Client,
    pending_key: String,
    inflight_key: String,
    receipts_key: String,
    deliveries_key: String,
    visibility_timeout: Duration,
    claim: Script,
    ack: Script,
}

impl RedisQueue {
    pub fn new(
        redis_url: &str,
        queue_name: &str,
        visibility_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            pending_key: queue_name.to_string(),
            inflight_key: format!("{}:inflight", queue_name),
            receipts_key: format!("{}:receipts", queue_name),
            deliveries_key: format!("{}:deliveries", queue_name),
            visibility_timeout,
            claim: Script::new(CLAIM_SCRIPT),
            ack: Script::new(ACK_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    /// Publish a message body. Returns the message id.
    pub async fn enqueue(&self, body: &str) -> Result<String, QueueError> {
        let mut conn = self.connection().await?;
        let envelope = Envelope {
            id: Uuid::new_v4().to_string(),
            body: body.to_string(),
        };
        let payload = serde_json::to_string(&envelope).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(&self.pending_key, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(envelope.id)
    }

    async fn try_claim(&self) -> Result<Option<QueueMessage>, QueueError> {
        let mut conn = self.connection().await?;
        let now_ms = Utc::now().timestamp_millis();
        let deadline_ms = now_ms + self.visibility_timeout.as_millis() as i64;
        let receipt = Uuid::new_v4().to_string();

        let claimed: Option<(String, u32)> = self
            .claim
            .key(&self.pending_key)
            .key(&self.inflight_key)
            .key(&self.receipts_key)
            .key(&self.deliveries_key)
            .arg(now_ms)
            .arg(deadline_ms)
            .arg(&receipt)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        match claimed {
            Some((payload, count)) => {
                let envelope: Envelope =
                    serde_json::from_str(&payload).map_err(QueueError::Serialize)?;
                Ok(Some(QueueMessage {
                    id: envelope.id,
                    receipt,
                    body: envelope.body,
                    receive_count: Some(count),
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(message) = self.try_claim().await? {
                return Ok(Some(message));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(CLAIM_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn acknowledge(&self, receipt: &str) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self
            .ack
            .key(&self.inflight_key)
            .key(&self.receipts_key)
            .key(&self.deliveries_key)
            .arg(receipt)
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(deleted == 1)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(&self.pending_key).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}
