// apptool-backup/src/backup/s3_upload.rs
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use tracing::{debug, info};

use crate::errors::{StorageError, StorageFailure};
use crate::storage::{sdk_error, S3ObjectStore};

impl S3ObjectStore {
    /// Single upload attempt of `file_path` under `key`.
    pub(crate) async fn upload_file(&self, key: &str, file_path: &Path) -> Result<(), StorageError> {
        let object_key = self.object_key(key);
        debug!(
            "Uploading {} to s3://{}/{}",
            file_path.display(),
            self.bucket,
            object_key
        );

        let body = ByteStream::from_path(file_path).await.map_err(|e| {
            StorageError::new(
                StorageFailure::Other,
                key,
                format!("Failed to read {}: {}", file_path.display(), e),
            )
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(body)
            .send()
            .await
            .map_err(|e| sdk_error(key, &e))?;

        info!(
            "✅ Uploaded {} to bucket {} with key {}",
            file_path.display(),
            self.bucket,
            object_key
        );
        Ok(())
    }
}
