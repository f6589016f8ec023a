use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Object storage as seen by the dispatcher: whole-object get, put and delete.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Deleting a key that does not exist succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;
}

/// S3 (or S3-compatible) client. Buckets are addressed per call since
/// uploads can arrive from any bucket wired to the notification queue.
pub struct S3BlobStore {
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3BlobStore {
    pub fn new(
        region: &str,
        endpoint: Option<&str>,
        access_key: Option<&str>,
        secret_key: Option<&str>,
    ) -> Result<Self, StorageError> {
        let (region, path_style) = match endpoint {
            Some(endpoint) => (
                Region::Custom {
                    region: region.to_string(),
                    endpoint: endpoint.to_string(),
                },
                true,
            ),
            None => (
                region
                    .parse::<Region>()
                    .map_err(|e| StorageError::Config(e.to_string()))?,
                false,
            ),
        };

        let credentials = Credentials::new(access_key, secret_key, None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            region,
            credentials,
            path_style,
        })
    }

    fn bucket(&self, name: &str) -> Result<Box<Bucket>, StorageError> {
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(StorageError::S3)?;
        Ok(if self.path_style {
            bucket.with_path_style()
        } else {
            bucket
        })
    }
}

fn check_status(bucket: &str, key: &str, code: u16) -> Result<(), StorageError> {
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(StorageError::Status {
            bucket: bucket.to_string(),
            key: key.to_string(),
            code,
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .bucket(bucket)?
            .get_object(key)
            .await
            .map_err(StorageError::S3)?;
        check_status(bucket, key, response.status_code())?;
        Ok(response.to_vec())
    }

    async fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let response = self
            .bucket(bucket)?
            .put_object(key, data)
            .await
            .map_err(StorageError::S3)?;
        check_status(bucket, key, response.status_code())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let response = self
            .bucket(bucket)?
            .delete_object(key)
            .await
            .map_err(StorageError::S3)?;
        check_status(bucket, key, response.status_code())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("S3 returned status {code} for {bucket}/{key}")]
    Status { bucket: String, key: String, code: u16 },

    #[error("Storage configuration error: {0}")]
    Config(String),
}
