// apptool-backup/src/backup/db_dump.rs
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{DatabaseConnection, DbEngine};
use crate::errors::{BackupError, Result};
use crate::restore::db_restore;
use crate::utils::find_executable;
use crate::utils::process::{run_command, CommandSpec};

/// Produces and applies database dumps for one logical connection.
pub trait DatabaseAdapter {
    async fn dump(&self, connection: &DatabaseConnection, output_file: &Path) -> Result<()>;

    /// Drops and recreates the target database, then imports `input_file`.
    async fn restore(&self, connection: &DatabaseConnection, input_file: &Path) -> Result<()>;
}

/// Drives the engine's own client tools (`mysqldump`/`mysql`,
/// `pg_dump`/`dropdb`/`createdb`/`psql`) as child processes.
#[derive(Debug, Clone)]
pub struct CliDatabaseAdapter {
    pub timeout: Duration,
}

impl CliDatabaseAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl DatabaseAdapter for CliDatabaseAdapter {
    async fn dump(&self, connection: &DatabaseConnection, output_file: &Path) -> Result<()> {
        let dump_err = |message: String| BackupError::Dump {
            connection: connection.name.clone(),
            message,
        };

        let tool = match connection.engine {
            DbEngine::Mysql => "mysqldump",
            DbEngine::Postgres => "pg_dump",
        };
        let program = find_executable(tool).map_err(dump_err)?;
        let spec = dump_command(program, connection, output_file).map_err(dump_err)?;

        info!(
            "Dumping database '{}' ({}) to {}",
            connection.database,
            connection.name,
            output_file.display()
        );
        let output = run_command(&spec, self.timeout).await.map_err(dump_err)?;
        if !output.stderr.is_empty() {
            warn!("{} reported for '{}': {}", tool, connection.name, output.stderr);
        }

        let size = fs::metadata(output_file).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(dump_err(format!(
                "{} produced an empty dump file at {}",
                tool,
                output_file.display()
            )));
        }
        info!("✓ Database '{}' dumped ({} bytes)", connection.database, size);
        Ok(())
    }

    async fn restore(&self, connection: &DatabaseConnection, input_file: &Path) -> Result<()> {
        db_restore::restore_database(connection, input_file, self.timeout).await
    }
}

/// Database names end up as positional arguments, so they may not look like options.
pub(crate) fn check_database_name(connection: &DatabaseConnection) -> std::result::Result<(), String> {
    let name = &connection.database;
    if name.trim().is_empty() || name.starts_with('-') || name.contains('\0') {
        return Err(format!("invalid database name '{}'", name));
    }
    Ok(())
}

/// Host, port and user arguments plus the password env var for a client tool.
pub(crate) fn connection_command(
    program: impl Into<std::path::PathBuf>,
    connection: &DatabaseConnection,
) -> std::result::Result<CommandSpec, String> {
    check_database_name(connection)?;
    let mut spec = CommandSpec::new(program);
    match connection.engine {
        DbEngine::Mysql => {
            spec = spec
                .arg("--host")
                .arg(&connection.host)
                .arg("--port")
                .arg(connection.port.to_string());
            if !connection.username.is_empty() {
                spec = spec.arg("--user").arg(&connection.username);
            }
        }
        DbEngine::Postgres => {
            spec = spec
                .arg("--host")
                .arg(&connection.host)
                .arg("--port")
                .arg(connection.port.to_string())
                .arg("--no-password");
            if !connection.username.is_empty() {
                spec = spec.arg("--username").arg(&connection.username);
            }
        }
    }

    if let Some(secret) = &connection.password {
        let password = secret.expose()?;
        let var = match connection.engine {
            DbEngine::Mysql => "MYSQL_PWD",
            DbEngine::Postgres => "PGPASSWORD",
        };
        spec = spec.env(var, password);
    }
    Ok(spec)
}

pub(crate) fn dump_command(
    program: impl Into<std::path::PathBuf>,
    connection: &DatabaseConnection,
    output_file: &Path,
) -> std::result::Result<CommandSpec, String> {
    let spec = connection_command(program, connection)?;
    let spec = match connection.engine {
        DbEngine::Mysql => {
            let mut result_file = OsString::from("--result-file=");
            result_file.push(output_file.as_os_str());
            spec.arg("--single-transaction")
                .arg(result_file)
                .arg(&connection.database)
        }
        DbEngine::Postgres => {
            let mut file = OsString::from("--file=");
            file.push(output_file.as_os_str());
            spec.arg(file).arg(format!("--dbname={}", connection.database))
        }
    };
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;

    fn connection(engine: DbEngine) -> DatabaseConnection {
        DatabaseConnection {
            name: "main".to_string(),
            engine,
            host: "db.internal".to_string(),
            port: 3307,
            username: "app".to_string(),
            password: Some(Secret::Value("p@ss; rm -rf /".to_string())),
            database: "shop".to_string(),
        }
    }

    fn args(spec: &CommandSpec) -> Vec<String> {
        spec.args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn mysql_dump_uses_discrete_args_and_env_password() {
        let spec = dump_command("mysqldump", &connection(DbEngine::Mysql), Path::new("/tmp/s/database.sql")).unwrap();

        assert_eq!(
            args(&spec),
            vec![
                "--host",
                "db.internal",
                "--port",
                "3307",
                "--user",
                "app",
                "--single-transaction",
                "--result-file=/tmp/s/database.sql",
                "shop"
            ]
        );
        assert!(args(&spec).iter().all(|a| !a.contains("p@ss")));
        assert_eq!(spec.envs, vec![("MYSQL_PWD".to_string(), "p@ss; rm -rf /".to_string())]);
    }

    #[test]
    fn postgres_dump_targets_named_database() {
        let spec = dump_command("pg_dump", &connection(DbEngine::Postgres), Path::new("out.sql")).unwrap();
        let args = args(&spec);

        assert!(args.contains(&"--no-password".to_string()));
        assert!(args.contains(&"--file=out.sql".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--dbname=shop"));
        assert_eq!(spec.envs[0].0, "PGPASSWORD");
    }

    #[test]
    fn option_like_database_name_is_rejected() {
        let mut conn = connection(DbEngine::Mysql);
        conn.database = "--all-databases".to_string();
        assert!(dump_command("mysqldump", &conn, Path::new("x.sql")).is_err());
    }

    #[test]
    fn missing_password_env_var_is_reported() {
        let mut conn = connection(DbEngine::Mysql);
        conn.password = Some(Secret::Env("APPTOOL_BACKUP_TEST_UNSET_VAR".to_string()));
        let err = dump_command("mysqldump", &conn, Path::new("x.sql")).unwrap_err();
        assert!(err.contains("APPTOOL_BACKUP_TEST_UNSET_VAR"));
    }
}
