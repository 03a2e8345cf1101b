mod commands;
mod render;

use crate::config::{self, AppConfig};
use crate::error::Result;
use crate::storage::StorageClient;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

/// Back up and restore databases to local or rclone destinations.
#[derive(Parser, Debug)]
#[command(name = "dbvault", version, about)]
pub struct Cli {
    /// Configuration file (default: ./dbvault.toml, then the user config dir)
    #[arg(short, long, env = "DBVAULT_CONFIG")]
    pub config: Option<PathBuf>,

    /// rclone configuration file, overriding the one in the config
    #[arg(long)]
    pub rclone_config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Back up the named databases, or all of them
    Backup {
        databases: Vec<String>,
        /// Dump only and keep the file locally
        #[arg(long)]
        dry_run: bool,
        /// Do not delete old backups
        #[arg(long)]
        skip_retention: bool,
        /// Do not ask before deleting old backups
        #[arg(short, long)]
        yes: bool,
    },
    /// Restore a database from a backup file
    Restore {
        database: String,
        /// File name at the destination, or a local path with --local
        file: String,
        #[arg(long)]
        local: bool,
    },
    /// List the backups stored for a database
    List { database: String },
    /// Test database connections and destination access
    Check { databases: Vec<String> },
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let mut config = config::load_from(&path)?;
    if cli.rclone_config.is_some() {
        config.rclone_config = cli.rclone_config.clone();
    }
    Ok(config)
}

/// Runs the selected command. Returns `false` when any database failed.
pub async fn run(cli: Cli, interrupts: Arc<AtomicUsize>) -> Result<bool> {
    let config = Arc::new(load_config(&cli)?);
    let storage = Arc::new(StorageClient::new(config.rclone_config.clone()));

    match cli.command {
        Commands::Backup {
            databases,
            dry_run,
            skip_retention,
            yes,
        } => {
            let opts = crate::backup::BackupOptions { dry_run, skip_retention };
            commands::backup(config, storage, &databases, opts, yes, interrupts).await
        }
        Commands::Restore { database, file, local } => {
            commands::restore(&config, storage.as_ref(), &database, file, local).await
        }
        Commands::List { database } => commands::list(&config, storage.as_ref(), &database).await,
        Commands::Check { databases } => commands::check(&config, storage.as_ref(), &databases).await,
    }
}
