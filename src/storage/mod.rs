//! Object storage seam shared by the backup upload and the restore download.

use aws_sdk_s3 as s3;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use s3::config::Region;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::config::DiskConfig;
use crate::errors::{StorageError, StorageFailure};

/// Named-blob storage. Both calls distinguish not-found, access and
/// transient failures through `StorageError::kind`.
pub trait ObjectStore {
    fn name(&self) -> &str;
    async fn put(&self, key: &str, local_file: &Path) -> Result<(), StorageError>;
    async fn get(&self, key: &str, local_file: &Path) -> Result<(), StorageError>;
}

/// An S3-compatible bucket (AWS, DigitalOcean Spaces, MinIO).
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    pub(crate) disk_name: String,
    pub(crate) client: s3::Client,
    pub(crate) bucket: String,
    pub(crate) folder_prefix: Option<String>,
    pub(crate) attempts: u32,
    pub(crate) base_delay: Duration,
}

impl S3ObjectStore {
    pub async fn connect(disk: &DiskConfig, attempts: u32) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest());
        if let Some(region) = &disk.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &disk.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (&disk.access_key_id, &disk.secret_access_key) {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                key_id,
                secret,
                None,     // session_token
                None,     // expiry
                "Static", // provider_name
            ));
        }
        let sdk_config = loader.load().await;

        let mut builder = s3::config::Builder::from(&sdk_config);
        if disk.endpoint_url.is_some() {
            builder = builder.force_path_style(true);
        }

        Self {
            disk_name: disk.name.clone(),
            client: s3::Client::from_conf(builder.build()),
            bucket: disk.bucket_name.clone(),
            folder_prefix: disk.folder_prefix.clone().filter(|p| !p.trim_matches('/').is_empty()),
            attempts: attempts.max(1),
            base_delay: Duration::from_secs(1),
        }
    }

    pub(crate) fn object_key(&self, key: &str) -> String {
        match &self.folder_prefix {
            Some(prefix) => format!("{}/{}", prefix.trim_matches('/'), key),
            None => key.to_string(),
        }
    }
}

impl ObjectStore for S3ObjectStore {
    fn name(&self) -> &str {
        &self.disk_name
    }

    async fn put(&self, key: &str, local_file: &Path) -> Result<(), StorageError> {
        with_retry(self.attempts, self.base_delay, "Upload", || self.upload_file(key, local_file)).await
    }

    async fn get(&self, key: &str, local_file: &Path) -> Result<(), StorageError> {
        with_retry(self.attempts, self.base_delay, "Download", || self.download_file(key, local_file)).await
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or
/// `attempts` runs out. Backoff doubles from `base_delay`.
pub async fn with_retry<T, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    what: &str,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                let backoff = base_delay * 2u32.saturating_pow(attempt - 1);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {}ms: {}",
                    what,
                    attempt,
                    attempts,
                    backoff.as_millis(),
                    e
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Maps an S3 error code and HTTP status to a failure kind.
pub fn classify_service_error(code: Option<&str>, status: Option<u16>) -> StorageFailure {
    match code {
        Some("NoSuchKey" | "NotFound" | "NoSuchBucket") => return StorageFailure::NotFound,
        Some(
            "AccessDenied"
            | "InvalidAccessKeyId"
            | "SignatureDoesNotMatch"
            | "ExpiredToken"
            | "InvalidToken"
            | "AllAccessDisabled",
        ) => return StorageFailure::AccessDenied,
        Some("SlowDown" | "RequestTimeout" | "InternalError" | "ServiceUnavailable") => {
            return StorageFailure::Transient;
        }
        _ => {}
    }
    match status {
        Some(404) => StorageFailure::NotFound,
        Some(401 | 403) => StorageFailure::AccessDenied,
        Some(408 | 429 | 500..=599) => StorageFailure::Transient,
        _ => StorageFailure::Other,
    }
}

pub(crate) fn sdk_error<E>(key: &str, err: &SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let kind = match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            StorageFailure::Transient
        }
        SdkError::ServiceError(_) => {
            classify_service_error(err.code(), err.raw_response().map(|r| r.status().as_u16()))
        }
        _ => StorageFailure::Other,
    };
    StorageError::new(kind, key, DisplayErrorContext(err).to_string())
}
