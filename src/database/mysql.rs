use super::driver::{DatabaseDriver, DumpSink};
use super::process::{probe, run_dump, run_restore};
use super::CONNECT_TIMEOUT_SECS;
use crate::config::DatabaseConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::info;

/// MySQL and MariaDB, through the `mysql` and `mysqldump` clients.
pub struct MysqlDriver {
    config: DatabaseConfig,
}

impl MysqlDriver {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("-h")
            .arg(&self.config.host)
            .arg("-P")
            .arg(self.config.port.to_string())
            .arg("-u")
            .arg(&self.config.user);
        if !self.config.password.is_empty() {
            cmd.env("MYSQL_PWD", &self.config.password);
        }
        cmd
    }
}

#[async_trait]
impl DatabaseDriver for MysqlDriver {
    async fn test_connection(&self) -> Result<()> {
        info!("Testing MySQL connection to {}:{}", self.config.host, self.config.port);
        let mut cmd = self.command("mysql");
        cmd.arg("-e").arg("SELECT 1").arg(&self.config.database);
        probe(cmd).await
    }

    async fn dump(&self, sink: &DumpSink) -> Result<()> {
        // mysqldump has no connect timeout of its own
        self.test_connection().await?;

        info!("Starting dump of database: {}", self.config.database);
        let mut cmd = self.command("mysqldump");
        cmd.arg("--column-statistics=0")
            .arg("--add-drop-table")
            .arg(&self.config.database);
        run_dump(cmd, sink).await
    }

    async fn restore(&self, backup_path: &Path) -> Result<()> {
        info!("Restoring {} into {}", backup_path.display(), self.config.database);
        let mut cmd = self.command("mysql");
        cmd.arg(format!("--connect-timeout={}", CONNECT_TIMEOUT_SECS))
            .arg(&self.config.database);
        run_restore(cmd, backup_path).await
    }

    fn dump_extension(&self) -> String {
        ".sql".to_string()
    }

    fn entry_name(&self) -> String {
        format!("{}.sql", self.config.database)
    }

    fn engine_name(&self) -> &'static str {
        "MySQL"
    }
}
