// apptool-backup/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const DEFAULT_TEMP_DIR: &str = "storage/app/backup-temp";
const DEFAULT_EXCLUDES: &[&str] = &["vendor", "node_modules"];
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_STORAGE_RETRIES: u32 = 3;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub base_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub temporary_directory: Option<PathBuf>,
    #[serde(default)]
    pub source: RawSource,
    #[serde(default)]
    pub destination: RawDestination,
    pub command_timeout_secs: Option<u64>,
    pub storage_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSource {
    #[serde(default)]
    pub files: RawFiles,
    #[serde(default)]
    pub databases: Vec<RawDatabase>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFiles {
    pub include: Option<Vec<PathBuf>>,
    pub exclude: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub follow_links: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDatabase {
    pub name: String,
    pub engine: Option<DbEngine>,
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password_env: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDestination {
    #[serde(default)]
    pub filename_prefix: String,
    #[serde(default)]
    pub disks: Vec<DiskConfig>,
}

/// One object-storage target. Missing credentials fall back to the default
/// AWS provider chain.
#[derive(Clone, Deserialize)]
pub struct DiskConfig {
    pub name: String,
    pub bucket_name: String,
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub folder_prefix: Option<String>,
}

impl fmt::Debug for DiskConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskConfig")
            .field("name", &self.name)
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id.as_ref().map(|_| "***"))
            .field("folder_prefix", &self.folder_prefix)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbEngine {
    Mysql,
    #[serde(alias = "pgsql", alias = "postgresql")]
    Postgres,
}

impl DbEngine {
    fn default_port(self) -> u16 {
        match self {
            DbEngine::Mysql => 3306,
            DbEngine::Postgres => 5432,
        }
    }
}

/// Where a database password comes from. Never rendered by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    Env(String),
    Value(String),
}

impl Secret {
    pub fn expose(&self) -> std::result::Result<String, String> {
        match self {
            Secret::Env(var) => std::env::var(var)
                .map_err(|e| format!("password environment variable {} is not usable: {}", var, e)),
            Secret::Value(v) => Ok(v.clone()),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Env(var) => write!(f, "Env({})", var),
            Secret::Value(_) => f.write_str("Value(***)"),
        }
    }
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConnection {
    pub name: String,
    pub engine: DbEngine,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<Secret>,
    pub database: String,
}

#[derive(Debug, Clone)]
pub struct FileSelection {
    pub include: Vec<PathBuf>,
    pub exclude: Vec<PathBuf>,
    pub follow_links: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub base_path: PathBuf,
    pub env_file: Option<PathBuf>,
    pub temporary_directory: PathBuf,
    pub files: FileSelection,
    pub databases: Vec<DatabaseConnection>,
    pub filename_prefix: String,
    pub disks: Vec<DiskConfig>,
    pub command_timeout: Duration,
    pub storage_retries: u32,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!(
                "Failed to parse JSON from config file at {}",
                config_path.display()
            )
        })?;
        Self::from_raw(raw_json_config)
    }

    pub fn from_raw(raw: RawJsonConfig) -> Result<Self> {
        let base_path = std::path::absolute(raw.base_path.unwrap_or_else(|| PathBuf::from(".")))
            .context("Failed to resolve base_path")?;
        let resolve = |p: &Path| base_path.join(p);

        let include = raw
            .source
            .files
            .include
            .unwrap_or_default()
            .iter()
            .map(|p| resolve(p))
            .collect();
        let exclude = match raw.source.files.exclude {
            Some(list) => list.iter().map(|p| resolve(p)).collect(),
            None => DEFAULT_EXCLUDES.iter().map(|p| resolve(Path::new(p))).collect(),
        };

        if raw.source.databases.is_empty() {
            anyhow::bail!("source.databases must list at least one database connection in config.json");
        }
        let mut databases = Vec::with_capacity(raw.source.databases.len());
        for db in &raw.source.databases {
            let conn = parse_database_connection(db)
                .with_context(|| format!("Invalid database connection '{}'", db.name))?;
            if databases.iter().any(|c: &DatabaseConnection| c.name == conn.name) {
                anyhow::bail!("Duplicate database connection name '{}'", conn.name);
            }
            databases.push(conn);
        }

        let disks = raw.destination.disks;
        if disks.is_empty() {
            anyhow::bail!("destination.disks must list at least one storage disk in config.json");
        }
        if let Some(disk) = disks.iter().find(|d| d.bucket_name.trim().is_empty()) {
            anyhow::bail!("bucket_name cannot be empty for disk '{}'", disk.name);
        }

        Ok(AppConfig {
            env_file: Some(resolve(&raw.env_file.unwrap_or_else(|| PathBuf::from(".env")))),
            temporary_directory: resolve(
                &raw.temporary_directory.unwrap_or_else(|| PathBuf::from(DEFAULT_TEMP_DIR)),
            ),
            files: FileSelection {
                include,
                exclude,
                follow_links: raw.source.files.follow_links,
            },
            databases,
            filename_prefix: raw.destination.filename_prefix,
            disks,
            command_timeout: Duration::from_secs(
                raw.command_timeout_secs.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
            ),
            storage_retries: raw.storage_retries.unwrap_or(DEFAULT_STORAGE_RETRIES).max(1),
            base_path,
        })
    }

    /// Loads the application's env file so `password_env` and AWS variables
    /// can be read from it. Variables already set in the process win.
    pub fn load_env_file(&self) {
        if let Some(env_file) = self.env_file.as_ref().filter(|p| p.is_file()) {
            if let Err(e) = dotenv::from_path(env_file) {
                tracing::warn!("Could not load env file {}: {}", env_file.display(), e);
            }
        }
    }

    pub fn disk(&self, name: Option<&str>) -> Result<&DiskConfig> {
        match name {
            Some(name) => self
                .disks
                .iter()
                .find(|d| d.name == name)
                .with_context(|| format!("No disk named '{}' in destination.disks", name)),
            None => self.disks.first().context("No storage disk configured"),
        }
    }
}

/// Resolves one connection entry, either from a `url` or from discrete fields.
fn parse_database_connection(raw: &RawDatabase) -> Result<DatabaseConnection> {
    if raw.name.trim().is_empty() {
        anyhow::bail!("database connection name cannot be empty");
    }
    let password_env = raw.password_env.clone().map(Secret::Env);

    if let Some(url) = &raw.url {
        let parsed = Url::parse(url).context("Invalid database URL format")?;
        let engine = match parsed.scheme() {
            "mysql" => DbEngine::Mysql,
            "postgres" | "postgresql" => DbEngine::Postgres,
            other => anyhow::bail!("Unsupported database URL scheme '{}'", other),
        };
        if raw.engine.is_some_and(|e| e != engine) {
            anyhow::bail!("engine does not match the URL scheme '{}'", parsed.scheme());
        }
        let database = parsed.path().trim_start_matches('/').to_string();
        if database.is_empty() {
            anyhow::bail!("Database name not found in URL path");
        }
        let password = parsed
            .password()
            .map(|p| Secret::Value(p.to_string()))
            .or(password_env);
        return Ok(DatabaseConnection {
            name: raw.name.clone(),
            engine,
            host: parsed.host_str().unwrap_or("localhost").to_string(),
            port: parsed.port().unwrap_or(engine.default_port()),
            username: parsed.username().to_string(),
            password,
            database,
        });
    }

    let engine = raw.engine.unwrap_or(DbEngine::Mysql);
    let database = raw
        .database
        .clone()
        .filter(|d| !d.trim().is_empty())
        .context("either url or database must be set")?;
    Ok(DatabaseConnection {
        name: raw.name.clone(),
        engine,
        host: raw.host.clone().unwrap_or_else(|| "localhost".to_string()),
        port: raw.port.unwrap_or(engine.default_port()),
        username: raw.username.clone().unwrap_or_default(),
        password: password_env,
        database,
    })
}
