mod types;

pub use types::*;

use crate::error::{BackupError, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};

const LOCAL_CONFIG_FILE: &str = "dbvault.toml";

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("dbvault"))
        .unwrap_or_else(|| PathBuf::from(".dbvault"))
}

/// `./dbvault.toml` when present, otherwise the per-user config file.
pub fn default_config_path() -> PathBuf {
    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    config_dir().join("config.toml")
}

pub fn load_from(path: &Path) -> Result<AppConfig> {
    info!("Loading configuration from {:?}", path);
    let contents = fs::read_to_string(path)
        .map_err(|e| BackupError::Config(format!("reading config file {}: {}", path.display(), e)))?;
    parse(&contents)
}

pub fn parse(contents: &str) -> Result<AppConfig> {
    let expanded = expand_env_vars(contents);
    let mut config: AppConfig = toml::from_str(&expanded)
        .map_err(|e| BackupError::Config(format!("parsing config file: {}", e)))?;

    apply_defaults(&mut config);
    validate(&config)?;

    debug!("Loaded {} database(s)", config.databases.len());
    Ok(config)
}

fn apply_defaults(config: &mut AppConfig) {
    for db in config.databases.values_mut() {
        if db.port == 0 {
            db.port = db.kind.default_port();
        }
    }
}

fn valid_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("name pattern is valid"))
        .is_match(name)
}

pub fn validate(config: &AppConfig) -> Result<()> {
    if config.databases.is_empty() {
        return Err(BackupError::Config("no databases configured".to_string()));
    }

    for (name, db) in &config.databases {
        let invalid = |msg: &str| Err(BackupError::Config(format!("database {:?}: {}", name, msg)));

        if !valid_name(name) {
            return invalid("name must contain only letters, digits, dashes, and underscores");
        }

        match db.kind {
            DatabaseKind::File => {
                if db.path.as_ref().map_or(true, |p| p.as_os_str().is_empty()) {
                    return invalid("path is required for file type");
                }
            }
            DatabaseKind::MySQL | DatabaseKind::Postgres => {
                if db.host.is_empty() {
                    return invalid("host is required");
                }
                if db.user.is_empty() {
                    return invalid("user is required");
                }
                if db.database.is_empty() {
                    return invalid("database name is required");
                }
            }
        }

        if db.dest.is_empty() {
            return invalid("dest is required");
        }
    }

    Ok(())
}

/// Replaces `${VAR}` with the variable's value. Unset or empty variables are
/// left as written.
pub fn expand_env_vars(s: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("env pattern is valid"));

    pattern
        .replace_all(s, |caps: &regex::Captures| match std::env::var(&caps[1]) {
            Ok(val) if !val.is_empty() => val,
            _ => caps[0].to_string(),
        })
        .into_owned()
}
