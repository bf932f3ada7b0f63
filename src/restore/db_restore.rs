// apptool-backup/src/restore/db_restore.rs
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

use crate::backup::db_dump::connection_command;
use crate::config::{DatabaseConnection, DbEngine};
use crate::errors::{BackupError, DbRestoreStep, Result};
use crate::utils::find_executable;
use crate::utils::process::{run_command, CommandSpec};

fn quote_mysql_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Builds the command for one restore sub-step.
pub(crate) fn restore_command(
    program: impl Into<PathBuf>,
    connection: &DatabaseConnection,
    step: DbRestoreStep,
    input_file: &Path,
) -> std::result::Result<CommandSpec, String> {
    let spec = connection_command(program, connection)?;
    let db = &connection.database;
    let spec = match (connection.engine, step) {
        (DbEngine::Mysql, DbRestoreStep::Drop) => spec
            .arg("--execute")
            .arg(format!("DROP DATABASE IF EXISTS {}", quote_mysql_identifier(db))),
        (DbEngine::Mysql, DbRestoreStep::Create) => spec
            .arg("--execute")
            .arg(format!("CREATE DATABASE {}", quote_mysql_identifier(db))),
        (DbEngine::Mysql, DbRestoreStep::Import) => spec.arg(db).stdin_file(input_file),
        (DbEngine::Postgres, DbRestoreStep::Drop) => spec.arg("--if-exists").arg(db),
        (DbEngine::Postgres, DbRestoreStep::Create) => spec.arg(db),
        (DbEngine::Postgres, DbRestoreStep::Import) => {
            let mut file = OsString::from("--file=");
            file.push(input_file.as_os_str());
            spec.arg("-X")
                .arg("-q")
                .arg("-v")
                .arg("ON_ERROR_STOP=1")
                .arg(format!("--dbname={}", db))
                .arg(file)
        }
    };
    Ok(spec)
}

fn tool_for(engine: DbEngine, step: DbRestoreStep) -> &'static str {
    match (engine, step) {
        (DbEngine::Mysql, _) => "mysql",
        (DbEngine::Postgres, DbRestoreStep::Drop) => "dropdb",
        (DbEngine::Postgres, DbRestoreStep::Create) => "createdb",
        (DbEngine::Postgres, DbRestoreStep::Import) => "psql",
    }
}

/// Drops, recreates and imports one database. Each sub-step fails on its
/// own; there is no rollback, so anything after a successful drop leaves the
/// database empty or partial.
pub async fn restore_database(
    connection: &DatabaseConnection,
    input_file: &Path,
    timeout: Duration,
) -> Result<()> {
    if !input_file.is_file() {
        return Err(BackupError::RestoreDb {
            step: DbRestoreStep::Import,
            connection: connection.name.clone(),
            message: format!("dump file not found: {}", input_file.display()),
        });
    }

    for step in [DbRestoreStep::Drop, DbRestoreStep::Create, DbRestoreStep::Import] {
        let fail = |message: String| BackupError::RestoreDb {
            step,
            connection: connection.name.clone(),
            message,
        };

        let program = find_executable(tool_for(connection.engine, step)).map_err(fail)?;
        let spec = restore_command(program, connection, step, input_file).map_err(fail)?;

        info!("Database '{}': {} ...", connection.database, step);
        if let Err(message) = run_command(&spec, timeout).await {
            if step != DbRestoreStep::Drop {
                error!(
                    "Database '{}' was dropped and is now empty or partially imported",
                    connection.database
                );
            }
            return Err(fail(message));
        }
    }

    info!("✓ Database '{}' restored from {}", connection.database, input_file.display());
    Ok(())
}
