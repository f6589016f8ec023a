use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::operation::delete_message::DeleteMessageError;
use aws_sdk_sqs::types::{MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use std::time::Duration;

use super::{MessageQueue, QueueError};
use crate::models::message::QueueMessage;

/// SQS caps long polling at 20 seconds.
const MAX_WAIT_SECONDS: u64 = 20;

/// Amazon SQS consumer bound to a single queue URL.
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    /// Build a client. Static keys are used when both are given, otherwise the
    /// default AWS provider chain applies.
    pub async fn new(
        region: &str,
        access_key: Option<&str>,
        secret_key: Option<&str>,
        queue_url: &str,
    ) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));
        if let (Some(access_key), Some(secret_key)) = (access_key, secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "transcode-dispatch",
            ));
        }
        let sdk_config = loader.load().await;

        Self {
            client: Client::new(&sdk_config),
            queue_url: queue_url.to_string(),
        }
    }
}

fn sqs_error<E>(err: E) -> QueueError
where
    E: std::error::Error,
{
    QueueError::Sqs(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl MessageQueue for SqsQueue {
    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(1)
            .wait_time_seconds(wait.as_secs().min(MAX_WAIT_SECONDS) as i32)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .send()
            .await
            .map_err(sqs_error)?;

        let Some(message) = output.messages.unwrap_or_default().into_iter().next() else {
            return Ok(None);
        };

        let id = message.message_id().unwrap_or_default().to_string();
        let receipt = message
            .receipt_handle()
            .ok_or_else(|| QueueError::Malformed(format!("message {} has no receipt handle", id)))?
            .to_string();
        let receive_count = message
            .attributes()
            .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
            .and_then(|count| count.parse().ok());

        Ok(Some(QueueMessage {
            id,
            receipt,
            body: message.body().unwrap_or_default().to_string(),
            receive_count,
        }))
    }

    async fn acknowledge(&self, receipt: &str) -> Result<bool, QueueError> {
        let result = self
            .client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => match err.into_service_error() {
                DeleteMessageError::ReceiptHandleIsInvalid(_) => Ok(false),
                other => Err(sqs_error(other)),
            },
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(sqs_error)?;

        Ok(output
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|depth| depth.parse().ok())
            .unwrap_or(0))
    }
}
