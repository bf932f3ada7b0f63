use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Sub-step of a database restore. Drop, create and import are not
/// transactional, so a failure names the one that broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbRestoreStep {
    Drop,
    Create,
    Import,
}

impl fmt::Display for DbRestoreStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DbRestoreStep::Drop => "drop",
            DbRestoreStep::Create => "create",
            DbRestoreStep::Import => "import",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFailure {
    NotFound,
    AccessDenied,
    Transient,
    Other,
}

impl fmt::Display for StorageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageFailure::NotFound => "not found",
            StorageFailure::AccessDenied => "access denied",
            StorageFailure::Transient => "transient failure",
            StorageFailure::Other => "failure",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
#[error("Storage {kind} for key '{key}': {message}")]
pub struct StorageError {
    pub kind: StorageFailure,
    pub key: String,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageFailure, key: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.to_string(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == StorageFailure::Transient
    }
}

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Staging error at {path}: {message}")]
    Staging { path: PathBuf, message: String },

    #[error("Database dump failed for connection '{connection}': {message}")]
    Dump { connection: String, message: String },

    #[error("Database restore ({step}) failed for connection '{connection}': {message}")]
    RestoreDb {
        step: DbRestoreStep,
        connection: String,
        message: String,
    },

    #[error("Archive error at {path}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Invalid argument: {0}")]
    InvalidRequest(String),

    #[error("Revision control error: {0}")]
    RevisionControl(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{step} step failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<BackupError>,
    },
}

impl BackupError {
    pub fn staging(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        BackupError::Staging {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn archive(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        BackupError::Archive {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackupError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn at_step(self, step: &'static str) -> Self {
        BackupError::Step {
            step,
            source: Box::new(self),
        }
    }

    /// Name of the workflow step that failed, if the error was tagged with one.
    pub fn step(&self) -> Option<&'static str> {
        match self {
            BackupError::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    /// The underlying error with any step tagging removed.
    pub fn root(&self) -> &BackupError {
        match self {
            BackupError::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Guidance printed to the operator next to the error message.
    pub fn operator_hint(&self) -> Option<&'static str> {
        match self.root() {
            BackupError::Storage(e) => match e.kind {
                StorageFailure::NotFound => Some(
                    "Make sure to provide the full key name of the backup file and that the key exists in the bucket.",
                ),
                StorageFailure::AccessDenied => Some(
                    "The storage credentials were rejected. Check the access key, secret and bucket permissions.",
                ),
                StorageFailure::Transient => {
                    Some("The storage service could not be reached. Retry once connectivity is restored.")
                }
                StorageFailure::Other => None,
            },
            BackupError::RestoreDb { .. } => Some(
                "The target database may now be empty or partially imported. Re-run the restore or import the dump manually.",
            ),
            BackupError::InvalidRequest(_) => Some("Usage: backup restore --by=key --value=<storage key>"),
            _ => match self.step() {
                Some("files restore") => Some(
                    "The uploaded files directory may be partially replaced. Re-run the restore before serving traffic.",
                ),
                _ => None,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_tag_is_reported_in_message_and_unwrapped_by_root() {
        let err = BackupError::Dump {
            connection: "mysql".to_string(),
            message: "exit status 2".to_string(),
        }
        .at_step("dump");

        assert_eq!(err.step(), Some("dump"));
        assert!(err.to_string().starts_with("dump step failed"));
        assert!(matches!(err.root(), BackupError::Dump { .. }));
    }

    #[test]
    fn storage_hints_distinguish_missing_key_from_bad_credentials() {
        let missing: BackupError = StorageError::new(StorageFailure::NotFound, "a.tar.gz", "NoSuchKey").into();
        let denied: BackupError = StorageError::new(StorageFailure::AccessDenied, "a.tar.gz", "AccessDenied").into();

        let missing_hint = missing.at_step("fetch").operator_hint().unwrap_or_default();
        let denied_hint = denied.operator_hint().unwrap_or_default();
        assert!(missing_hint.contains("key exists"));
        assert!(denied_hint.contains("credentials"));
    }
}
