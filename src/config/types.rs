use crate::backup::compression::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    File,
    MySQL,
    Postgres,
}

impl DatabaseKind {
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseKind::File => 0,
            DatabaseKind::MySQL => 3306,
            DatabaseKind::Postgres => 5432,
        }
    }
}

impl std::fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseKind::File => write!(f, "file"),
            DatabaseKind::MySQL => write!(f, "mysql"),
            DatabaseKind::Postgres => write!(f, "postgres"),
        }
    }
}

/// Retention rules. Zero disables a rule; any active rule can mark a file for
/// deletion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionConfig {
    #[serde(default)]
    pub keep_last: u32,
    #[serde(default)]
    pub keep_days: u32,
    #[serde(default)]
    pub max_size_mb: u64,
}

impl RetentionConfig {
    pub fn is_enabled(&self) -> bool {
        self.keep_last > 0 || self.keep_days > 0 || self.max_size_mb > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub kind: DatabaseKind,
    /// Source file for the `file` kind.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    /// Local directory or rclone `remote:path`.
    pub dest: String,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: DatabaseKind::File,
            path: None,
            host: "localhost".to_string(),
            port: 0,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            dest: String::new(),
            compression: Compression::None,
            retention: RetentionConfig::default(),
        }
    }
}
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub rclone_config: Option<PathBuf>,
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseConfig>,
}
