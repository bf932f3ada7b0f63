// apptool-backup/src/restore/s3_download.rs
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::errors::{StorageError, StorageFailure};
use crate::storage::{sdk_error, S3ObjectStore};

impl S3ObjectStore {
    /// Single download attempt of `key` into `destination_path`. A partially
    /// written file is removed on failure.
    pub(crate) async fn download_file(&self, key: &str, destination_path: &Path) -> Result<(), StorageError> {
        let object_key = self.object_key(key);
        debug!(
            "Downloading s3://{}/{} to {}",
            self.bucket,
            object_key,
            destination_path.display()
        );

        let local_err = |e: std::io::Error| {
            StorageError::new(
                StorageFailure::Other,
                key,
                format!("Failed to write {}: {}", destination_path.display(), e),
            )
        };

        if let Some(parent_dir) = destination_path.parent() {
            tokio::fs::create_dir_all(parent_dir).await.map_err(local_err)?;
        }

        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| sdk_error(key, &e))?;

        let mut output_file = File::create(destination_path).await.map_err(local_err)?;
        let mut body = object.body.into_async_read();
        let copied = tokio::io::copy(&mut body, &mut output_file).await;
        let flushed = match copied {
            Ok(bytes) => output_file.flush().await.map(|_| bytes),
            Err(e) => Err(e),
        };

        match flushed {
            Ok(bytes) => {
                info!(
                    "✅ Downloaded {} bytes from s3://{}/{} to {}",
                    bytes,
                    self.bucket,
                    object_key,
                    destination_path.display()
                );
                Ok(())
            }
            Err(e) => {
                drop(output_file);
                let _ = tokio::fs::remove_file(destination_path).await;
                // The body stream broke mid-transfer.
                Err(StorageError::new(
                    StorageFailure::Transient,
                    key,
                    format!("Download interrupted: {}", e),
                ))
            }
        }
    }
}
