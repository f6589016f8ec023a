use serde::{Deserialize, Serialize};

/// A message handed out by the queue for one delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub id: String,
    /// Capability required to acknowledge this delivery. Invalid once used or
    /// once the visibility timeout lapses.
    pub receipt: String,
    pub body: String,
    /// How many times the queue has delivered this message, when it reports it.
    pub receive_count: Option<u32>,
}
