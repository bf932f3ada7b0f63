pub(crate) mod archive;
pub(crate) mod db_dump;
pub(crate) mod logic;
pub(crate) mod metadata;
pub(crate) mod s3_upload;
pub(crate) mod staging;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::AppConfig;
use crate::storage::S3ObjectStore;
use crate::utils::revision::GitRevisionControl;
use db_dump::CliDatabaseAdapter;
use logic::BackupWorkflow;

/// Public entry point for the backup process.
pub async fn run_backup_flow(app_config: &AppConfig) -> Result<()> {
    let database = CliDatabaseAdapter::new(app_config.command_timeout);
    let revisions = GitRevisionControl::new(&app_config.base_path, app_config.command_timeout);

    let mut stores = Vec::with_capacity(app_config.disks.len());
    for disk in &app_config.disks {
        stores.push(S3ObjectStore::connect(disk, app_config.storage_retries).await);
    }

    let artifact = BackupWorkflow::new(app_config, &database, &stores, &revisions)
        .run()
        .await
        .context("Backup process failed")?;

    info!(
        "Backup {} uploaded to {} disk(s) with {} file(s)",
        artifact.storage_key,
        artifact.disks.len(),
        artifact.files
    );
    println!("📦 Backup key: {}", artifact.storage_key);
    Ok(())
}
