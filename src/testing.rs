//! Fakes and fixtures for exercising the workflows without external tools.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use walkdir::WalkDir;

use crate::backup::db_dump::DatabaseAdapter;
use crate::config::{AppConfig, DatabaseConnection, DbEngine, DiskConfig, FileSelection};
use crate::errors::{BackupError, DbRestoreStep, Result, StorageError, StorageFailure};
use crate::storage::ObjectStore;
use crate::utils::revision::RevisionControl;

pub fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// Every regular file under `root`, keyed by relative path.
pub fn read_tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

pub fn connection(name: &str) -> DatabaseConnection {
    DatabaseConnection {
        name: name.to_string(),
        engine: DbEngine::Mysql,
        host: "localhost".to_string(),
        port: 3306,
        username: "root".to_string(),
        password: None,
        database: format!("{}_db", name),
    }
}

/// Application at `<root>/app` with uploads in `public/upload`.
pub fn app_config(root: &Path) -> AppConfig {
    let base_path = root.join("app");
    AppConfig {
        env_file: None,
        temporary_directory: base_path.join("storage/app/backup-temp"),
        files: FileSelection {
            include: vec![base_path.join("public/upload")],
            exclude: vec![base_path.join("vendor")],
            follow_links: false,
        },
        databases: vec![connection("mysql")],
        filename_prefix: String::new(),
        disks: vec![DiskConfig {
            name: "fake".to_string(),
            bucket_name: "bucket".to_string(),
            region: None,
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            folder_prefix: None,
        }],
        command_timeout: Duration::from_secs(5),
        storage_retries: 1,
        base_path,
    }
}

#[derive(Default)]
pub struct FakeDatabase {
    pub dumps: Mutex<Vec<String>>,
    pub restores: Mutex<Vec<(String, Vec<u8>)>>,
    pub fail_dump_for: Option<String>,
    pub fail_restore_at: Option<DbRestoreStep>,
}

impl DatabaseAdapter for FakeDatabase {
    async fn dump(&self, connection: &DatabaseConnection, output_file: &Path) -> Result<()> {
        if self.fail_dump_for.as_deref() == Some(connection.name.as_str()) {
            return Err(BackupError::Dump {
                connection: connection.name.clone(),
                message: "mysqldump failed with status: exit status: 2".to_string(),
            });
        }
        fs::write(output_file, format!("-- dump of {}\n", connection.database))
            .map_err(|e| BackupError::io(output_file, e))?;
        self.dumps.lock().unwrap().push(connection.name.clone());
        Ok(())
    }

    async fn restore(&self, connection: &DatabaseConnection, input_file: &Path) -> Result<()> {
        if let Some(step) = self.fail_restore_at {
            return Err(BackupError::RestoreDb {
                step,
                connection: connection.name.clone(),
                message: "mysql failed with status: exit status: 1".to_string(),
            });
        }
        let body = fs::read(input_file).map_err(|e| BackupError::io(input_file, e))?;
        self.restores.lock().unwrap().push((connection.name.clone(), body));
        Ok(())
    }
}

/// A bucket backed by a local directory.
pub struct FakeStore {
    pub name: String,
    pub bucket: PathBuf,
    pub puts: AtomicUsize,
    pub gets: AtomicUsize,
    pub fail_put: Option<StorageFailure>,
    pub fail_get: Option<StorageFailure>,
}

impl FakeStore {
    pub fn new(bucket: &Path) -> Self {
        fs::create_dir_all(bucket).unwrap();
        Self {
            name: "fake".to_string(),
            bucket: bucket.to_path_buf(),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            fail_put: None,
            fail_get: None,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = fs::read_dir(&self.bucket)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        keys.sort();
        keys
    }

    pub fn calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst) + self.gets.load(Ordering::SeqCst)
    }
}

impl ObjectStore for FakeStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn put(&self, key: &str, local_file: &Path) -> std::result::Result<(), StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.fail_put {
            return Err(StorageError::new(kind, key, "put rejected"));
        }
        fs::copy(local_file, self.bucket.join(key))
            .map(|_| ())
            .map_err(|e| StorageError::new(StorageFailure::Other, key, e.to_string()))
    }

    async fn get(&self, key: &str, local_file: &Path) -> std::result::Result<(), StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.fail_get {
            return Err(StorageError::new(kind, key, "get rejected"));
        }
        let source = self.bucket.join(key);
        if !source.is_file() {
            return Err(StorageError::new(StorageFailure::NotFound, key, "NoSuchKey"));
        }
        fs::copy(source, local_file)
            .map(|_| ())
            .map_err(|e| StorageError::new(StorageFailure::Other, key, e.to_string()))
    }
}

#[derive(Default)]
pub struct FakeRevision {
    /// `None` makes `current_revision` fail.
    pub current: Option<String>,
    pub checkouts: Mutex<Vec<String>>,
    pub fail_checkout: bool,
}

impl FakeRevision {
    pub fn at(revision: &str) -> Self {
        Self {
            current: Some(revision.to_string()),
            ..Self::default()
        }
    }
}

impl RevisionControl for FakeRevision {
    async fn current_revision(&self) -> Result<String> {
        self.current
            .clone()
            .ok_or_else(|| BackupError::RevisionControl("fatal: not a git repository".to_string()))
    }

    async fn checkout(&self, revision: &str) -> Result<()> {
        if self.fail_checkout {
            return Err(BackupError::RevisionControl(format!(
                "error: pathspec '{}' did not match",
                revision
            )));
        }
        self.checkouts.lock().unwrap().push(revision.to_string());
        Ok(())
    }
}
