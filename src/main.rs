//! Application backup/restore tool
//!
//! `backup make` snapshots databases, uploaded files and the current commit
//! into one archive on object storage; `backup restore` puts them back.

// apptool-backup/src/main.rs
mod backup;
mod config;
mod errors;
mod restore;
mod storage;
mod utils;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use errors::BackupError;
use restore::logic::RestoreRequest;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "backup", version, about = "Back up and restore an application deployment")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a backup and upload it to every configured disk
    Make,
    /// Restore the project from a backup archive
    Restore {
        /// How the backup is selected (`key` or `k`)
        #[arg(long, default_value = "")]
        by: String,
        /// Full storage key of the backup archive
        #[arg(long, default_value = "")]
        value: String,
        /// Disk to fetch from; defaults to the first configured disk
        #[arg(long)]
        disk: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = utils::logger::init(&cli.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run_app(cli).await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            if let Some(hint) = e.downcast_ref::<BackupError>().and_then(BackupError::operator_hint) {
                eprintln!("💡 {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Make => {
            let app_config = load_config(&cli.config)?;
            println!("🚀 Starting Backup Process...");
            backup::run_backup_flow(&app_config).await
        }
        Command::Restore { by, value, disk } => {
            let request = RestoreRequest::new(by, value);
            // Reject bad selectors before reading config or touching anything.
            request.validate().map_err(|e| e.at_step("validation"))?;

            let app_config = load_config(&cli.config)?;
            println!("🔄 Starting Restore Process...");
            restore::run_restore_flow(&app_config, &request, disk.as_deref()).await
        }
    }
}

fn load_config(path: &std::path::Path) -> Result<AppConfig> {
    let app_config = AppConfig::load_from_json(path).context(format!(
        "Failed to load application configuration from {}",
        path.display()
    ))?;
    app_config.load_env_file();
    Ok(app_config)
}
