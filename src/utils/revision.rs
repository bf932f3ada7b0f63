// apptool-backup/src/utils/revision.rs
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{BackupError, Result};
use crate::utils::find_executable;
use crate::utils::process::{run_command, CommandSpec};

/// Read and move the code revision of the deployed application.
pub trait RevisionControl {
    async fn current_revision(&self) -> Result<String>;
    async fn checkout(&self, revision: &str) -> Result<()>;
}

/// Git working copy rooted at the application base path.
#[derive(Debug, Clone)]
pub struct GitRevisionControl {
    pub repo_dir: PathBuf,
    pub timeout: Duration,
}

impl GitRevisionControl {
    pub fn new(repo_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            timeout,
        }
    }

    fn git(&self) -> Result<CommandSpec> {
        let git = find_executable("git").map_err(BackupError::RevisionControl)?;
        Ok(CommandSpec::new(git).arg("-C").arg(self.repo_dir.as_os_str()))
    }
}

impl RevisionControl for GitRevisionControl {
    async fn current_revision(&self) -> Result<String> {
        let spec = self.git()?.arg("rev-parse").arg("HEAD");
        let output = run_command(&spec, self.timeout)
            .await
            .map_err(BackupError::RevisionControl)?;
        Ok(output.stdout)
    }

    async fn checkout(&self, revision: &str) -> Result<()> {
        validate_revision(revision)?;
        let spec = self.git()?.arg("checkout").arg(revision);
        run_command(&spec, self.timeout)
            .await
            .map_err(BackupError::RevisionControl)?;
        Ok(())
    }
}

/// A revision id read back from an archive must not be mistaken for an option.
pub fn validate_revision(revision: &str) -> Result<()> {
    if revision.is_empty() || revision.starts_with('-') || revision.chars().any(char::is_whitespace) {
        return Err(BackupError::RevisionControl(format!(
            "refusing to check out malformed revision id '{}'",
            revision
        )));
    }
    Ok(())
}
