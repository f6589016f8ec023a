use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::RecordFailurePolicy;
use crate::models::event::{EventError, UploadEvent, UploadRecord};
use crate::models::job::JobDescriptor;
use crate::models::message::QueueMessage;
use crate::services::cleanup::{CleanupError, SourceCleanup};
use crate::services::compute::{CompletedJob, LaunchFailure, Launcher};
use crate::services::queue::{MessageQueue, QueueError};
use crate::services::telemetry;

/// Pause after a failed receive so an unreachable queue is not hammered.
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub output_bucket: String,
    pub receive_wait: Duration,
    pub failure_policy: RecordFailurePolicy,
    /// Deliveries beyond this count are logged as likely poison messages.
    pub receive_count_warn_threshold: u32,
}

/// What happened to one received message.
#[derive(Debug)]
pub enum MessageOutcome {
    /// The receive returned no message.
    Idle,
    /// Every record (possibly none) completed and the message was deleted.
    Acknowledged {
        health_check: bool,
        completed: Vec<CompletedJob>,
    },
    /// The message was not deleted and will be redelivered.
    Abandoned(AbandonReason),
}

impl MessageOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, MessageOutcome::Acknowledged { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AbandonReason {
    #[error("Malformed message body: {0}")]
    Malformed(#[from] EventError),

    #[error("{} of {attempted} jobs failed", .failures.len())]
    JobsFailed {
        attempted: usize,
        failures: Vec<LaunchFailure>,
    },

    #[error("Source cleanup failed: {0}")]
    Cleanup(#[from] CleanupError),

    #[error("Receipt was no longer valid when acknowledging")]
    ReceiptExpired,

    #[error("Acknowledgement failed: {0}")]
    Acknowledge(#[source] QueueError),
}

impl AbandonReason {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            AbandonReason::Malformed(_) => "malformed",
            AbandonReason::JobsFailed { .. } => "jobs_failed",
            AbandonReason::Cleanup(_) => "cleanup",
            AbandonReason::ReceiptExpired => "receipt_expired",
            AbandonReason::Acknowledge(_) => "acknowledge",
        }
    }
}

/// The control loop: receive, parse, run one job per record, clean up,
/// acknowledge.
///
/// Messages are handled one at a time and records strictly in order, so a
/// record never has two live jobs within one dispatcher. Across instances the
/// queue's visibility timeout is the only exclusion.
pub struct Dispatcher {
    queue: Arc<dyn MessageQueue>,
    launcher: Launcher,
    cleanup: SourceCleanup,
    settings: DispatcherSettings,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        launcher: Launcher,
        cleanup: SourceCleanup,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            queue,
            launcher,
            cleanup,
            settings,
        }
    }

    /// Process messages until the process is stopped. Nothing inside the loop
    /// is fatal.
    pub async fn run(&self) {
        info!(
            output_bucket = %self.settings.output_bucket,
            failure_policy = %self.settings.failure_policy,
            "Dispatcher ready, waiting for upload events"
        );

        loop {
            match self.process_next().await {
                Ok(MessageOutcome::Idle) => {
                    debug!("No new messages");
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "Failed to receive from queue, will retry");
                    sleep(RECEIVE_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Receive at most one message and handle it.
    pub async fn process_next(&self) -> Result<MessageOutcome, QueueError> {
        let Some(message) = self.queue.receive(self.settings.receive_wait).await? else {
            return Ok(MessageOutcome::Idle);
        };

        let span = info_span!("message", message_id = %message.id);
        Ok(self.handle_message(message).instrument(span).await)
    }

    /// Handle one delivered message end to end. Never acknowledges unless
    /// every record's job succeeded and its source was deleted.
    pub async fn handle_message(&self, message: QueueMessage) -> MessageOutcome {
        metrics::counter!(telemetry::MESSAGES_RECEIVED).increment(1);
        info!(
            receive_count = ?message.receive_count,
            body_len = message.body.len(),
            "Message received"
        );
        if let Some(count) = message.receive_count {
            if count > self.settings.receive_count_warn_threshold {
                warn!(
                    receive_count = count,
                    "Message has been delivered repeatedly; check the queue's redrive policy"
                );
            }
        }

        let outcome = match UploadEvent::parse(&message.body) {
            Err(e) => MessageOutcome::Abandoned(AbandonReason::Malformed(e)),
            Ok(event) => self.handle_event(&message, &event).await,
        };

        match &outcome {
            MessageOutcome::Abandoned(reason) => {
                warn!(
                    reason = reason.label(),
                    error = %reason,
                    "Message left for redelivery"
                );
                metrics::counter!(telemetry::MESSAGES_ABANDONED, "reason" => reason.label())
                    .increment(1);
            }
            MessageOutcome::Acknowledged { completed, .. } => {
                info!(jobs = completed.len(), "Message acknowledged");
                metrics::counter!(telemetry::MESSAGES_ACKNOWLEDGED).increment(1);
            }
            MessageOutcome::Idle => {}
        }
        outcome
    }

    async fn handle_event(&self, message: &QueueMessage, event: &UploadEvent) -> MessageOutcome {
        if let UploadEvent::HealthCheck { service } = event {
            info!(service = %service, "Received test event");
            return self.acknowledge(message, true, Vec::new()).await;
        }

        let records = event.records();
        info!(records = records.len(), "Dispatching upload records");
        match self.run_records(records).await {
            Err(reason) => MessageOutcome::Abandoned(reason),
            Ok(completed) => match self.cleanup.delete_sources(records).await {
                Err(e) => MessageOutcome::Abandoned(AbandonReason::Cleanup(e)),
                Ok(()) => self.acknowledge(message, false, completed).await,
            },
        }
    }

    /// Run one job per record, in order.
    async fn run_records(
        &self,
        records: &[UploadRecord],
    ) -> Result<Vec<CompletedJob>, AbandonReason> {
        let mut completed = Vec::with_capacity(records.len());
        let mut failures = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let descriptor = JobDescriptor::for_record(record, &self.settings.output_bucket);
            match self.launcher.submit_and_await(&descriptor).await {
                Ok(job) => completed.push(job),
                Err(failure) => {
                    failures.push(failure);
                    if self.settings.failure_policy == RecordFailurePolicy::Stop {
                        info!(
                            skipped = records.len() - index - 1,
                            "Skipping remaining records after failure"
                        );
                        break;
                    }
                }
            }
        }

        if failures.is_empty() {
            Ok(completed)
        } else {
            Err(AbandonReason::JobsFailed {
                attempted: completed.len() + failures.len(),
                failures,
            })
        }
    }

    async fn acknowledge(
        &self,
        message: &QueueMessage,
        health_check: bool,
        completed: Vec<CompletedJob>,
    ) -> MessageOutcome {
        match self.queue.acknowledge(&message.receipt).await {
            Ok(true) => MessageOutcome::Acknowledged {
                health_check,
                completed,
            },
            Ok(false) => MessageOutcome::Abandoned(AbandonReason::ReceiptExpired),
            Err(e) => MessageOutcome::Abandoned(AbandonReason::Acknowledge(e)),
        }
    }
}
