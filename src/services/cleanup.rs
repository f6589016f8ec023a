use std::sync::Arc;
use tracing::info;

use crate::models::event::UploadRecord;
use crate::services::storage::{BlobStore, StorageError};

/// Removes original uploads once every rendition has been produced.
pub struct SourceCleanup {
    store: Arc<dyn BlobStore>,
}

impl SourceCleanup {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Delete each record's source in order, stopping at the first failure.
    /// Safe to repeat: deleting an already-deleted key succeeds.
    pub async fn delete_sources(&self, records: &[UploadRecord]) -> Result<(), CleanupError> {
        for record in records {
            self.store
                .delete(&record.bucket, &record.key)
                .await
                .map_err(|source| CleanupError {
                    bucket: record.bucket.clone(),
                    key: record.key.clone(),
                    source,
                })?;
            info!(bucket = %record.bucket, key = %record.key, "Deleted source upload");
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to delete source {bucket}/{key}: {source}")]
pub struct CleanupError {
    pub bucket: String,
    pub key: String,
    #[source]
    pub source: StorageError,
}
