pub(crate) mod db_restore;
pub(crate) mod logic;
pub(crate) mod s3_download;

use anyhow::{Context, Result};

use crate::backup::db_dump::CliDatabaseAdapter;
use crate::config::AppConfig;
use crate::storage::S3ObjectStore;
use crate::utils::revision::GitRevisionControl;
use logic::{RestoreRequest, RestoreWorkflow};

/// Public entry point for the restore process. `disk` selects the storage
/// disk by name; the first configured disk is used otherwise.
pub async fn run_restore_flow(
    app_config: &AppConfig,
    request: &RestoreRequest,
    disk: Option<&str>,
) -> Result<()> {
    let disk = app_config.disk(disk).context("Failed to select a storage disk")?;
    let store = S3ObjectStore::connect(disk, app_config.storage_retries).await;
    let database = CliDatabaseAdapter::new(app_config.command_timeout);
    let revisions = GitRevisionControl::new(&app_config.base_path, app_config.command_timeout);

    let report = RestoreWorkflow::new(app_config, &database, &store, &revisions)
        .run(request)
        .await
        .context("Restore process failed")?;

    println!(
        "🗓️  Restored backup taken at {} ({})",
        report.metadata.created_at, report.storage_key
    );
    for warning in &report.warnings {
        println!("⚠️  {}", warning);
    }
    Ok(())
}
