// apptool-backup/src/backup/metadata.rs
use chrono::{NaiveDateTime, SubsecRound};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::errors::{BackupError, Result};

/// File name of the metadata record inside a staging area and an archive.
pub const INFO_FILE: &str = "info";

/// Binds an archive to the time it was taken and the code revision running then.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    #[serde(with = "created_at_format")]
    pub created_at: NaiveDateTime,
    #[serde(rename = "commit", default)]
    pub revision_id: Option<String>,
}

mod created_at_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

impl BackupMetadata {
    pub fn new(created_at: NaiveDateTime, revision_id: Option<String>) -> Self {
        Self {
            created_at: created_at.trunc_subsecs(0),
            revision_id,
        }
    }

    /// The recorded revision, if there is a usable one.
    pub fn revision(&self) -> Option<&str> {
        self.revision_id
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
    }

    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(INFO_FILE);
        let body = serde_json::to_string_pretty(self)
            .map_err(|e| BackupError::staging(&path, format!("Failed to serialize metadata: {}", e)))?;
        fs::write(&path, body).map_err(|e| BackupError::io(&path, e))?;
        Ok(path)
    }

    /// Reads the record from an extracted archive. A missing or unreadable
    /// record means the archive is not a usable backup.
    pub fn read_from(dir: &Path) -> Result<Self> {
        let path = dir.join(INFO_FILE);
        let body = match fs::read_to_string(&path) {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BackupError::archive(&path, "archive does not contain an info record"));
            }
            Err(e) => return Err(BackupError::io(&path, e)),
        };
        serde_json::from_str(&body)
            .map_err(|e| BackupError::archive(&path, format!("info record is malformed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_milli_opt(h, m, s, 750))
            .unwrap()
    }

    #[test]
    fn written_record_uses_created_at_and_commit_keys() {
        let dir = tempfile::tempdir().unwrap();
        let meta = BackupMetadata::new(at(14, 5, 9), Some("9fceb02".to_string()));
        meta.write_to(dir.path()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("info")).unwrap()).unwrap();
        assert_eq!(raw["created_at"], "2024-03-09 14:05:09");
        assert_eq!(raw["commit"], "9fceb02");
        assert_eq!(BackupMetadata::read_from(dir.path()).unwrap(), meta);
    }

    #[test]
    fn empty_or_missing_commit_has_no_revision() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("info"), r#"{"created_at": "2024-03-09 14:05:09", "commit": "  "}"#).unwrap();
        assert_eq!(BackupMetadata::read_from(dir.path()).unwrap().revision(), None);

        fs::write(dir.path().join("info"), r#"{"created_at": "2024-03-09 14:05:09"}"#).unwrap();
        assert_eq!(BackupMetadata::read_from(dir.path()).unwrap().revision(), None);
    }

    #[test]
    fn missing_or_malformed_record_is_an_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(BackupMetadata::read_from(dir.path()), Err(BackupError::Archive { .. })));

        fs::write(dir.path().join("info"), "created_at=yesterday").unwrap();
        assert!(matches!(BackupMetadata::read_from(dir.path()), Err(BackupError::Archive { .. })));
    }
}
