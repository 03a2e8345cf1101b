use super::driver::{DatabaseDriver, DumpSink};
use super::process::{probe, run_dump, run_restore};
use super::CONNECT_TIMEOUT_SECS;
use crate::config::DatabaseConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::info;

/// PostgreSQL, through `psql` and `pg_dump`.
pub struct PostgresDriver {
    config: DatabaseConfig,
}

impl PostgresDriver {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-h")
            .arg(&self.config.host)
            .arg("-p")
            .arg(self.config.port.to_string())
            .arg("-U")
            .arg(&self.config.user)
            .env("PGCONNECT_TIMEOUT", CONNECT_TIMEOUT_SECS.to_string());
        if !self.config.password.is_empty() {
            cmd.env("PGPASSWORD", &self.config.password);
        }
        cmd
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    async fn test_connection(&self) -> Result<()> {
        info!("Testing PostgreSQL connection to {}:{}", self.config.host, self.config.port);
        let mut cmd = self.command("psql");
        cmd.arg("-d")
            .arg(&self.config.database)
            .arg("-c")
            .arg("SELECT 1");
        probe(cmd).await
    }

    async fn dump(&self, sink: &DumpSink) -> Result<()> {
        info!("Starting dump of database: {}", self.config.database);
        let mut cmd = self.command("pg_dump");
        cmd.arg("--clean")
            .arg("--if-exists")
            .arg(&self.config.database);
        run_dump(cmd, sink).await
    }

    async fn restore(&self, backup_path: &Path) -> Result<()> {
        info!("Restoring {} into {}", backup_path.display(), self.config.database);
        let mut cmd = self.command("psql");
        cmd.arg("-d").arg(&self.config.database);
        run_restore(cmd, backup_path).await
    }

    fn dump_extension(&self) -> String {
        ".sql".to_string()
    }

    fn entry_name(&self) -> String {
        format!("{}.sql", self.config.database)
    }

    fn engine_name(&self) -> &'static str {
        "PostgreSQL"
    }
}
