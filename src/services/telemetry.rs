pub const MESSAGES_RECEIVED: &str = "dispatcher_messages_received_total";
pub const MESSAGES_ACKNOWLEDGED: &str = "dispatcher_messages_acknowledged_total";
pub const MESSAGES_ABANDONED: &str = "dispatcher_messages_abandoned_total";
pub const JOBS_SUBMITTED: &str = "dispatcher_jobs_submitted_total";
pub const JOBS_SUCCEEDED: &str = "dispatcher_jobs_succeeded_total";
pub const JOBS_FAILED: &str = "dispatcher_jobs_failed_total";
pub const JOB_DURATION: &str = "dispatcher_job_duration_seconds";
pub const SWEEP_DELETED: &str = "dispatcher_sweep_deleted_total";
pub const QUEUE_DEPTH: &str = "dispatcher_queue_depth";

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(MESSAGES_RECEIVED, "Queue messages received");
    metrics::describe_counter!(
        MESSAGES_ACKNOWLEDGED,
        "Queue messages deleted after all their records completed"
    );
    metrics::describe_counter!(
        MESSAGES_ABANDONED,
        "Queue messages left for redelivery, by reason"
    );
    metrics::describe_counter!(JOBS_SUBMITTED, "Compute units requested");
    metrics::describe_counter!(JOBS_SUCCEEDED, "Compute units observed terminated");
    metrics::describe_counter!(JOBS_FAILED, "Compute units that failed, by reason");
    metrics::describe_histogram!(
        JOB_DURATION,
        "Time from submission to observed termination"
    );
    metrics::describe_counter!(SWEEP_DELETED, "Abandoned compute units reclaimed by the sweep");
    metrics::describe_gauge!(QUEUE_DEPTH, "Approximate number of messages waiting");
}
