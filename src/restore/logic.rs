// apptool-backup/src/restore/logic.rs
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::backup::archive::{self, collect_entries, relative_location, PackOptions, ARCHIVE_EXTENSION};
use crate::backup::db_dump::DatabaseAdapter;
use crate::backup::logic::{dump_file_name, reserved_entries};
use crate::backup::metadata::BackupMetadata;
use crate::backup::staging::StagingArea;
use crate::config::AppConfig;
use crate::errors::{BackupError, Result};
use crate::storage::ObjectStore;
use crate::utils::revision::RevisionControl;

pub const RESTORES_DIR: &str = "restores";

pub const ENV_REMINDER: &str =
    "Please reconcile the configuration file (.env) with .env.example manually; restores never overwrite it.";

/// How the artifact to restore is selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    /// The caller names the full storage key.
    ExactKey,
}

impl FromStr for RestoreMode {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "key" | "k" => Ok(RestoreMode::ExactKey),
            other => Err(BackupError::InvalidRequest(format!("unknown restore mode '{}'", other))),
        }
    }
}

/// Raw selector as given on the command line.
#[derive(Debug, Clone)]
pub struct RestoreRequest {
    pub by: String,
    pub value: String,
}

impl RestoreRequest {
    pub fn new(by: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            by: by.into(),
            value: value.into(),
        }
    }

    /// Checks the selector without touching the filesystem or network.
    pub fn validate(&self) -> Result<(RestoreMode, String)> {
        let mode = self.by.parse::<RestoreMode>()?;
        let key = self.value.trim();
        if key.is_empty() {
            return Err(BackupError::InvalidRequest("a storage key is required".to_string()));
        }
        Ok((mode, key.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreState {
    Init,
    Validated,
    Fetched,
    Unpacked,
    FilesRestored,
    DatabaseRestored,
    CodeRestored,
    CleanedUp,
    Failed,
}

impl RestoreState {
    pub fn step_name(self) -> &'static str {
        match self {
            RestoreState::Init | RestoreState::Failed => "init",
            RestoreState::Validated => "validation",
            RestoreState::Fetched => "fetch",
            RestoreState::Unpacked => "unpack",
            RestoreState::FilesRestored => "files restore",
            RestoreState::DatabaseRestored => "database restore",
            RestoreState::CodeRestored => "code checkout",
            RestoreState::CleanedUp => "cleanup",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub storage_key: String,
    pub metadata: BackupMetadata,
    pub checked_out: Option<String>,
    pub warnings: Vec<String>,
}

/// Local directory name for a restore of `key`: the last path segment
/// without its archive extension.
pub fn staging_name_for(key: &str) -> String {
    let last = key.rsplit('/').next().unwrap_or(key);
    let stem = match last.strip_suffix(&format!(".{}", ARCHIVE_EXTENSION)) {
        Some(stem) => stem.to_string(),
        None => Path::new(last)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    if stem.is_empty() || stem == "." || stem == ".." {
        "restore".to_string()
    } else {
        stem
    }
}

/// One restore run: validate, fetch, unpack, replace uploaded files, restore
/// databases, check out code, clean up.
pub struct RestoreWorkflow<'a, D, S, R> {
    config: &'a AppConfig,
    database: &'a D,
    store: &'a S,
    revisions: &'a R,
    state: RestoreState,
    staging: Option<StagingArea>,
    metadata: Option<BackupMetadata>,
    destructive_started: bool,
    warnings: Vec<String>,
}

impl<'a, D, S, R> RestoreWorkflow<'a, D, S, R>
where
    D: DatabaseAdapter,
    S: ObjectStore,
    R: RevisionControl,
{
    pub fn new(config: &'a AppConfig, database: &'a D, store: &'a S, revisions: &'a R) -> Self {
        Self {
            config,
            database,
            store,
            revisions,
            state: RestoreState::Init,
            staging: None,
            metadata: None,
            destructive_started: false,
            warnings: Vec::new(),
        }
    }

    pub fn state(&self) -> RestoreState {
        self.state
    }

    pub async fn run(&mut self, request: &RestoreRequest) -> Result<RestoreReport> {
        println!("------------------------- START RESTORING -------------------------");
        match self.advance(request).await {
            Ok(report) => {
                println!("------------------------- END RESTORING -------------------------");
                println!("⚠️  {}", ENV_REMINDER);
                Ok(report)
            }
            Err(e) => {
                self.state = RestoreState::Failed;
                if let Some(staging) = self.staging.take() {
                    if self.destructive_started {
                        let kept = staging.keep();
                        error!(
                            "Extracted backup kept at {} for manual recovery",
                            kept.display()
                        );
                    } else {
                        let mut staging = staging;
                        if let Err(cleanup_err) = staging.release() {
                            warn!("Cleanup after failed restore also failed: {}", cleanup_err);
                        }
                    }
                }
                Err(e)
            }
        }
    }

    fn enter<T>(&mut self, next: RestoreState, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.state = next;
                Ok(value)
            }
            Err(e) => Err(e.at_step(next.step_name())),
        }
    }

    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }

    async fn advance(&mut self, request: &RestoreRequest) -> Result<RestoreReport> {
        let validated = request.validate();
        let (_mode, key) = self.enter(RestoreState::Validated, validated)?;

        let fetched = self.fetch(&key).await;
        self.enter(RestoreState::Fetched, fetched)?;
        println!("------------------------- RECEIVED BACKUP FROM STORAGE -------------------------");

        let unpacked = self.unpack();
        let metadata = self.enter(RestoreState::Unpacked, unpacked)?;
        self.metadata = Some(metadata.clone());

        self.destructive_started = true;
        let files = self.restore_files();
        self.enter(RestoreState::FilesRestored, files)?;
        println!("------------------------- RESTORED UPLOADED FILES -------------------------");

        let databases = self.restore_databases().await;
        self.enter(RestoreState::DatabaseRestored, databases)?;
        self.destructive_started = false;
        println!("------------------------- RESTORED DATABASE -------------------------");

        // The revision is already in memory; staging is only released afterwards.
        let checked_out = self.restore_code(metadata.revision()).await;
        self.state = RestoreState::CodeRestored;

        if let Some(mut staging) = self.staging.take() {
            if let Err(e) = staging.release() {
                self.warn(format!("Could not remove restore files: {}", e));
            }
        }
        self.state = RestoreState::CleanedUp;
        println!("------------------------- CLEANED RESTORE DIRECTORY -------------------------");

        info!(
            "Project restored from backup key {} (commit: {})",
            key,
            checked_out.as_deref().unwrap_or("unchanged")
        );
        Ok(RestoreReport {
            storage_key: key,
            metadata,
            checked_out,
            warnings: std::mem::take(&mut self.warnings),
        })
    }

    fn staging(&self) -> Result<&StagingArea> {
        self.staging
            .as_ref()
            .ok_or_else(|| BackupError::staging(&self.config.temporary_directory, "staging area not acquired"))
    }

    async fn fetch(&mut self, key: &str) -> Result<()> {
        let staging = StagingArea::acquire(
            &self.config.temporary_directory.join(RESTORES_DIR),
            &staging_name_for(key),
        )?;
        info!("Fetching {} from disk '{}'", key, self.store.name());
        let archive_path = staging.archive_path().to_path_buf();
        self.staging = Some(staging);
        self.store.get(key, &archive_path).await?;
        Ok(())
    }

    /// Extracts the archive and checks that everything the destructive steps
    /// need is present before any of them runs.
    fn unpack(&self) -> Result<BackupMetadata> {
        let staging = self.staging()?;
        archive::unpack(staging.archive_path(), staging.path())?;

        let metadata = BackupMetadata::read_from(staging.path())?;
        for connection in &self.config.databases {
            let dump = staging
                .path()
                .join(dump_file_name(&self.config.databases, connection));
            if !dump.is_file() {
                return Err(BackupError::archive(
                    dump,
                    format!("archive has no dump for connection '{}'", connection.name),
                ));
            }
        }
        info!("Backup taken at {} is complete", metadata.created_at);
        Ok(metadata)
    }

    /// Replaces each include root wholesale with its copy from the archive.
    /// Files uploaded after the backup was taken are lost. Excluded paths, the
    /// env file and the temporary directory inside a root are left alone.
    fn restore_files(&mut self) -> Result<()> {
        let extracted = self.staging()?.path().to_path_buf();
        let roots = self.config.files.include.clone();
        let reserved = reserved_entries(&self.config.databases);

        let mut protected = self.config.files.exclude.clone();
        protected.push(self.config.temporary_directory.clone());
        protected.push(extracted.clone());
        protected.extend(self.config.env_file.iter().cloned());

        for root in &roots {
            if is_protected(root, &protected) {
                self.warn(format!(
                    "{} is excluded or holds restore files; left untouched",
                    root.display()
                ));
                continue;
            }
            let relative = relative_location(root, &self.config.base_path);
            let source = extracted.join(&relative);
            clear_tree(root, &protected)?;

            if source.is_file() {
                copy_file(&source, root)?;
            } else if source.is_dir() {
                let entries = collect_entries(&[source.clone()], &source, &PackOptions::default())?;
                fs::create_dir_all(root).map_err(|e| BackupError::io(root, e))?;
                let mut restored = 0;
                for entry in &entries {
                    let dest = root.join(&entry.archive_path);
                    if reserved.contains(&relative.join(&entry.archive_path)) || is_protected(&dest, &protected) {
                        continue;
                    }
                    copy_file(&entry.source_path, &dest)?;
                    restored += 1;
                }
                info!("Restored {} file(s) into {}", restored, root.display());
            } else {
                fs::create_dir_all(root).map_err(|e| BackupError::io(root, e))?;
                self.warn(format!(
                    "Archive has no copy of {}; it was left empty",
                    root.display()
                ));
            }
        }
        Ok(())
    }

    async fn restore_databases(&self) -> Result<()> {
        let extracted = self.staging()?.path().to_path_buf();
        for connection in &self.config.databases {
            let dump = extracted.join(dump_file_name(&self.config.databases, connection));
            if let Err(e) = self.database.restore(connection, &dump).await {
                error!(
                    "Database restore for '{}' failed; the database may be empty. Dump kept at {}",
                    connection.name,
                    dump.display()
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Checks out the recorded revision. Missing metadata or a failed checkout
    /// only produce warnings.
    async fn restore_code(&mut self, revision: Option<&str>) -> Option<String> {
        let Some(revision) = revision else {
            self.warn("Backup has no recorded commit; code checkout skipped".to_string());
            return None;
        };
        match self.revisions.checkout(revision).await {
            Ok(()) => {
                println!(
                    "-------------------- CHECKED OUT TO THE COMMIT {} --------------------",
                    revision
                );
                Some(revision.to_string())
            }
            Err(e) => {
                self.warn(format!(
                    "Could not check out commit {}: {}. Check it out manually.",
                    revision, e
                ));
                None
            }
        }
    }
}

fn is_protected(path: &Path, protected: &[PathBuf]) -> bool {
    protected.iter().any(|p| path.starts_with(p))
}

/// Removes `path`, except for protected paths beneath it: directories that
/// contain one are emptied around it instead of removed.
fn clear_tree(path: &Path, protected: &[PathBuf]) -> Result<()> {
    if is_protected(path, protected) {
        return Ok(());
    }
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(BackupError::io(path, e)),
    };
    if !meta.is_dir() || !protected.iter().any(|p| p.starts_with(path)) {
        return remove_existing(path);
    }
    for child in fs::read_dir(path).map_err(|e| BackupError::io(path, e))? {
        let child = child.map_err(|e| BackupError::io(path, e))?;
        clear_tree(&child.path(), protected)?;
    }
    Ok(())
}

fn remove_existing(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(|e| BackupError::io(path, e))
}

fn copy_file(source: &Path, dest: &PathBuf) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| BackupError::io(parent, e))?;
    }
    fs::copy(source, dest).map_err(|e| BackupError::io(source, e))?;
    Ok(())
}
