use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Read-only client for the wardrobe image-asset bucket (R2, S3-compatible).
/// Handlers resolve item image keys to the byte payloads sent to the
/// generation provider; this subsystem never writes assets.
pub struct AssetStore {
    bucket: Box<Bucket>,
}

impl AssetStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        // Path-style so the endpoint host needs no per-bucket DNS.
        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self { bucket })
    }

    /// Fetch image bytes by asset key.
    pub async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        Ok(response.to_vec())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
