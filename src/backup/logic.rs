// apptool-backup/src/backup/logic.rs
use chrono::{Local, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backup::archive::{self, collect_entries, PackOptions, ARCHIVE_EXTENSION};
use crate::backup::db_dump::DatabaseAdapter;
use crate::backup::metadata::{BackupMetadata, INFO_FILE};
use crate::backup::staging::StagingArea;
use crate::config::{AppConfig, DatabaseConnection};
use crate::errors::{BackupError, Result};
use crate::storage::ObjectStore;
use crate::utils::revision::RevisionControl;

/// Snapshot of the application env file, kept for reference only.
pub const ENV_SNAPSHOT: &str = ".env";
pub const BACKUPS_DIR: &str = "backups";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupState {
    Init,
    Staged,
    Dumped,
    FilesCopied,
    MetadataWritten,
    Archived,
    Uploaded,
    CleanedUp,
    Failed,
}

impl BackupState {
    /// Name of the transition that leads into this state.
    pub fn step_name(self) -> &'static str {
        match self {
            BackupState::Init | BackupState::Failed => "init",
            BackupState::Staged => "setup",
            BackupState::Dumped => "dump",
            BackupState::FilesCopied => "file copy",
            BackupState::MetadataWritten => "metadata",
            BackupState::Archived => "archive",
            BackupState::Uploaded => "upload",
            BackupState::CleanedUp => "cleanup",
        }
    }
}

/// The uploaded result of one backup run.
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub storage_key: String,
    pub metadata: BackupMetadata,
    pub disks: Vec<String>,
    pub files: usize,
}

/// Name of the dump file for `connection` inside a staging area.
pub fn dump_file_name(connections: &[DatabaseConnection], connection: &DatabaseConnection) -> String {
    if connections.len() == 1 {
        "database.sql".to_string()
    } else {
        format!("database-{}.sql", connection.name)
    }
}

/// Top-level archive entries written by the workflow itself; uploaded files
/// may never take these paths.
pub fn reserved_entries(connections: &[DatabaseConnection]) -> Vec<PathBuf> {
    connections
        .iter()
        .map(|c| PathBuf::from(dump_file_name(connections, c)))
        .chain([PathBuf::from(INFO_FILE), PathBuf::from(ENV_SNAPSHOT)])
        .collect()
}

/// One backup run: stage, dump, copy files, write metadata, archive, upload,
/// clean up. Each run owns a fresh instance.
pub struct BackupWorkflow<'a, D, S, R> {
    config: &'a AppConfig,
    database: &'a D,
    stores: &'a [S],
    revisions: &'a R,
    started_at: NaiveDateTime,
    state: BackupState,
    staging: Option<StagingArea>,
}

impl<'a, D, S, R> BackupWorkflow<'a, D, S, R>
where
    D: DatabaseAdapter,
    S: ObjectStore,
    R: RevisionControl,
{
    pub fn new(config: &'a AppConfig, database: &'a D, stores: &'a [S], revisions: &'a R) -> Self {
        Self {
            config,
            database,
            stores,
            revisions,
            started_at: Local::now().naive_local(),
            state: BackupState::Init,
            staging: None,
        }
    }

    /// Overrides the clock the staging name and metadata are derived from.
    pub fn started_at(mut self, started_at: NaiveDateTime) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn state(&self) -> BackupState {
        self.state
    }

    /// `<prefix><YYYY-mm-dd_HH-MM>`, unique per minute.
    pub fn staging_name(&self) -> String {
        format!(
            "{}{}",
            self.config.filename_prefix,
            self.started_at.format("%Y-%m-%d_%H-%M")
        )
    }

    /// Runs every step in order. Cleanup always runs; if it fails after an
    /// otherwise successful run, the run fails.
    pub async fn run(&mut self) -> Result<BackupArtifact> {
        let outcome = self.advance().await;

        println!("------------------------- CLEANING UP LOCAL BACKUP FILES -------------------------");
        let cleanup = match self.staging.as_mut() {
            Some(staging) => staging.release(),
            None => Ok(()),
        };

        match (outcome, cleanup) {
            (Ok(artifact), Ok(())) => {
                self.state = BackupState::CleanedUp;
                info!("🎉 Backup {} completed", artifact.storage_key);
                Ok(artifact)
            }
            (Ok(_), Err(e)) => {
                self.state = BackupState::Failed;
                Err(e.at_step(BackupState::CleanedUp.step_name()))
            }
            (Err(e), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    warn!("Cleanup after failed backup also failed: {}", cleanup_err);
                }
                self.state = BackupState::Failed;
                Err(e)
            }
        }
    }

    fn enter<T>(&mut self, next: BackupState, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.state = next;
                Ok(value)
            }
            Err(e) => Err(e.at_step(next.step_name())),
        }
    }

    async fn advance(&mut self) -> Result<BackupArtifact> {
        println!("------------------------- START CREATING BACKUP -------------------------");
        let staging = StagingArea::acquire(&self.config.temporary_directory.join(BACKUPS_DIR), &self.staging_name());
        let staging = self.enter(BackupState::Staged, staging)?;
        info!("Staging backup in {}", staging.path().display());
        self.staging = Some(staging);

        let dumped = self.dump_databases().await;
        self.enter(BackupState::Dumped, dumped)?;

        let copied = self.copy_files();
        let files = self.enter(BackupState::FilesCopied, copied)?;

        let written = self.write_metadata().await;
        let metadata = self.enter(BackupState::MetadataWritten, written)?;
        println!("------------------------- END CREATING BACKUP -------------------------");

        let archived = self.archive();
        let (archive_path, storage_key) = self.enter(BackupState::Archived, archived)?;

        println!("------------------------- UPLOADING BACKUP -------------------------");
        let uploaded = self.upload(&storage_key, &archive_path).await;
        let disks = self.enter(BackupState::Uploaded, uploaded)?;
        println!("------------------------- END UPLOADING BACKUP -------------------------");

        Ok(BackupArtifact {
            storage_key,
            metadata,
            disks,
            files,
        })
    }

    fn staging_dir(&self) -> Result<PathBuf> {
        self.staging
            .as_ref()
            .map(|s| s.path().to_path_buf())
            .ok_or_else(|| BackupError::staging(&self.config.temporary_directory, "staging area not acquired"))
    }

    async fn dump_databases(&self) -> Result<()> {
        let dir = self.staging_dir()?;
        for connection in &self.config.databases {
            let file = dir.join(dump_file_name(&self.config.databases, connection));
            self.database.dump(connection, &file).await?;
        }
        Ok(())
    }

    /// Copies the include roots into staging at their path relative to the
    /// base path, then snapshots the env file.
    fn copy_files(&self) -> Result<usize> {
        let dir = self.staging_dir()?;
        let files = &self.config.files;

        let roots: Vec<PathBuf> = files
            .include
            .iter()
            .filter(|root| {
                let exists = root.exists();
                if !exists {
                    warn!("Include path {} does not exist, skipping", root.display());
                }
                exists
            })
            .cloned()
            .collect();

        let mut excludes = files.exclude.clone();
        excludes.push(self.config.temporary_directory.clone());
        excludes.push(dir.clone());
        // Snapshotted separately as ENV_SNAPSHOT.
        excludes.extend(self.config.env_file.iter().cloned());
        let options = PackOptions {
            follow_links: files.follow_links,
            excludes,
        };

        let reserved = reserved_entries(&self.config.databases);

        let entries = collect_entries(&roots, &self.config.base_path, &options)?;
        for entry in &entries {
            if reserved.contains(&entry.archive_path) {
                return Err(BackupError::archive(
                    &entry.source_path,
                    format!("would overwrite reserved backup entry '{}'", entry.archive_path.display()),
                ));
            }
            copy_file(&entry.source_path, &dir.join(&entry.archive_path))?;
        }
        info!("Copied {} file(s) into staging", entries.len());

        match self.config.env_file.as_ref() {
            Some(env_file) if env_file.is_file() => {
                copy_file(env_file, &dir.join(ENV_SNAPSHOT))?;
            }
            Some(env_file) => warn!("Env file {} not found, not included in backup", env_file.display()),
            None => {}
        }

        Ok(entries.len())
    }

    async fn write_metadata(&self) -> Result<BackupMetadata> {
        let revision = match self.revisions.current_revision().await {
            Ok(rev) if !rev.trim().is_empty() => Some(rev.trim().to_string()),
            Ok(_) => {
                warn!("Revision control returned an empty revision id; recording none");
                None
            }
            Err(e) => {
                warn!("Could not read the current revision, recording none: {}", e);
                None
            }
        };
        let metadata = BackupMetadata::new(Local::now().naive_local(), revision);
        metadata.write_to(&self.staging_dir()?)?;
        Ok(metadata)
    }

    fn archive(&self) -> Result<(PathBuf, String)> {
        let staging = self
            .staging
            .as_ref()
            .ok_or_else(|| BackupError::staging(&self.config.temporary_directory, "staging area not acquired"))?;
        let archive_path = archive::pack(
            &[staging.path().to_path_buf()],
            staging.path(),
            staging.archive_path(),
            &PackOptions::default(),
        )?;
        let storage_key = format!("{}.{}", staging.name(), ARCHIVE_EXTENSION);
        Ok((archive_path, storage_key))
    }

    async fn upload(&self, storage_key: &str, archive_path: &Path) -> Result<Vec<String>> {
        let mut disks = Vec::with_capacity(self.stores.len());
        for store in self.stores {
            info!("Uploading {} to disk '{}'", storage_key, store.name());
            store.put(storage_key, archive_path).await?;
            disks.push(store.name().to_string());
        }
        Ok(disks)
    }
}

fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| BackupError::io(parent, e))?;
    }
    fs::copy(source, dest).map_err(|e| BackupError::io(source, e))?;
    Ok(())
}
