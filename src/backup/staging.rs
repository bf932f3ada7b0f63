// apptool-backup/src/backup/staging.rs
//! Per-run working directories.
//!
//! Creating the directory is the only mutual exclusion between runs: a
//! second run with the same name fails at `acquire` until the first one has
//! released it. Callers either serialize runs or use distinct names.
//!
//! A directory left behind with [`StagingArea::keep`] carries a marker file;
//! the next `acquire` of that name replaces it instead of failing.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::backup::archive::ARCHIVE_EXTENSION;
use crate::errors::{BackupError, Result};

const KEPT_MARKER: &str = ".kept";

#[derive(Debug)]
pub struct StagingArea {
    name: String,
    path: PathBuf,
    archive_path: PathBuf,
    released: bool,
}

impl StagingArea {
    /// Creates `<base_dir>/<name>`. Fails if it already exists.
    pub fn acquire(base_dir: &Path, name: &str) -> Result<Self> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(BackupError::staging(base_dir, format!("invalid staging name '{}'", name)));
        }

        fs::create_dir_all(base_dir).map_err(|e| {
            BackupError::staging(base_dir, format!("Failed to create staging root: {}", e))
        })?;

        let path = base_dir.join(name);
        let archive_path = base_dir.join(format!("{}.{}", name, ARCHIVE_EXTENSION));
        if path.join(KEPT_MARKER).is_file() {
            warn!("Replacing staging directory {} kept by an earlier failed run", path.display());
            fs::remove_dir_all(&path).map_err(|e| {
                BackupError::staging(&path, format!("Failed to remove kept staging directory: {}", e))
            })?;
            if let Err(e) = fs::remove_file(&archive_path) {
                if e.kind() != ErrorKind::NotFound {
                    return Err(BackupError::staging(&archive_path, format!("Failed to remove kept archive: {}", e)));
                }
            }
        }

        match fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BackupError::staging(
                    &path,
                    "directory already exists; another run with the same name may be in progress",
                ));
            }
            Err(e) => {
                return Err(BackupError::staging(&path, format!("Failed to create staging directory: {}", e)));
            }
        }
        debug!("📂 Staging directory created at {}", path.display());

        Ok(Self {
            name: name.to_string(),
            archive_path,
            path,
            released: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The archive file that sits next to the staging directory.
    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Removes the staging directory and its adjacent archive. Targets that
    /// are already gone are fine; anything else is reported.
    pub fn release(&mut self) -> Result<()> {
        self.released = true;
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!("Removed staging directory {}", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(BackupError::staging(&self.path, format!("Failed to remove staging directory: {}", e)));
            }
        }
        match fs::remove_file(&self.archive_path) {
            Ok(()) => debug!("Removed local archive {}", self.archive_path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(BackupError::staging(
                    &self.archive_path,
                    format!("Failed to remove local archive: {}", e),
                ));
            }
        }
        Ok(())
    }

    /// Leaves the directory on disk and returns its path. A later `acquire`
    /// of the same name takes it over.
    pub fn keep(mut self) -> PathBuf {
        self.released = true;
        if let Err(e) = fs::write(self.path.join(KEPT_MARKER), b"") {
            warn!("Could not mark {} as kept: {}", self.path.display(), e);
        }
        self.path.clone()
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release() {
                warn!("Staging cleanup on drop failed: {}", e);
            }
        }
    }
}
