mod local;
#[cfg(test)]
pub mod memory;
mod rclone;

pub use local::LocalStorage;
pub use rclone::RcloneStorage;

use crate::backup::naming::{backups_for, BackupFile};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// A file as seen at a storage destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Lists every file at `dest`, newest first by modification time.
    async fn list(&self, dest: &str) -> Result<Vec<RemoteFile>>;
    async fn upload(&self, local_path: &Path, dest: &str) -> Result<()>;
    /// Copies `file_name` from `dest` into `local_dir`, keeping its name.
    async fn download(&self, dest: &str, file_name: &str, local_dir: &Path) -> Result<()>;
    async fn delete(&self, dest: &str, file_name: &str) -> Result<()>;
    async fn test_access(&self, dest: &str) -> Result<()>;
}

/// Where a destination string points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination<'a> {
    Local(&'a Path),
    /// rclone syntax: `remote:path` or `:backend:path`.
    Remote(&'a str),
}

impl<'a> Destination<'a> {
    pub fn parse(dest: &'a str) -> Self {
        if dest.starts_with(':') {
            return Destination::Remote(dest);
        }
        match dest.find(':') {
            // single letters are Windows drive prefixes
            Some(idx) if idx > 1 && !dest[..idx].contains(['/', '\\']) => Destination::Remote(dest),
            _ => Destination::Local(Path::new(dest)),
        }
    }
}

/// The storage client used for a whole run. Local directories are handled
/// in-process; everything else goes through rclone.
pub struct StorageClient {
    local: LocalStorage,
    remote: RcloneStorage,
}

impl StorageClient {
    pub fn new(rclone_config: Option<PathBuf>) -> Self {
        Self {
            local: LocalStorage,
            remote: RcloneStorage::new(rclone_config),
        }
    }

    fn backend(&self, dest: &str) -> &dyn Storage {
        match Destination::parse(dest) {
            Destination::Local(_) => &self.local,
            Destination::Remote(_) => &self.remote,
        }
    }
}

#[async_trait]
impl Storage for StorageClient {
    async fn list(&self, dest: &str) -> Result<Vec<RemoteFile>> {
        self.backend(dest).list(dest).await
    }

    async fn upload(&self, local_path: &Path, dest: &str) -> Result<()> {
        self.backend(dest).upload(local_path, dest).await
    }

    async fn download(&self, dest: &str, file_name: &str, local_dir: &Path) -> Result<()> {
        self.backend(dest).download(dest, file_name, local_dir).await
    }

    async fn delete(&self, dest: &str, file_name: &str) -> Result<()> {
        self.backend(dest).delete(dest, file_name).await
    }

    async fn test_access(&self, dest: &str) -> Result<()> {
        self.backend(dest).test_access(dest).await
    }
}

/// Rejects file names that would point outside the directory they are
/// joined onto.
pub fn ensure_plain_name(file_name: &str) -> Result<()> {
    if file_name.is_empty() || file_name == "." || file_name == ".." || file_name.contains(['/', '\\']) {
        return Err(BackupError::Config(format!("invalid backup file name: {:?}", file_name)));
    }
    Ok(())
}

/// Backups of `db_name` stored at `dest`, newest first by the timestamp in
/// their names.
pub async fn list_for_database(storage: &dyn Storage, dest: &str, db_name: &str) -> Result<Vec<BackupFile>> {
    let files = storage.list(dest).await?;
    Ok(backups_for(&files, db_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_parse() {
        assert_eq!(Destination::parse("s3:bucket/path"), Destination::Remote("s3:bucket/path"));
        assert_eq!(Destination::parse("gdrive:"), Destination::Remote("gdrive:"));
        assert_eq!(Destination::parse(":local:/tmp"), Destination::Remote(":local:/tmp"));
        assert_eq!(Destination::parse("/mnt/backups"), Destination::Local(Path::new("/mnt/backups")));
        assert_eq!(Destination::parse("./out"), Destination::Local(Path::new("./out")));
        assert_eq!(Destination::parse("C:\\backups"), Destination::Local(Path::new("C:\\backups")));
        assert_eq!(
            Destination::parse("/data/odd:name"),
            Destination::Local(Path::new("/data/odd:name"))
        );
    }

    #[test]
    fn test_plain_names_only() {
        ensure_plain_name("mydb_20240115_143022.sql.gz").unwrap();
        for name in ["", ".", "..", "../x", "/etc/passwd", "sub/file.sql", "..\\x"] {
            assert!(matches!(ensure_plain_name(name), Err(BackupError::Config(_))), "{}", name);
        }
    }

    #[tokio::test]
    async fn test_list_for_database_through_client() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["mydb_20240101_000000.sql", "mydb_20240102_000000.sql", "other_20240103_000000.sql"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let client = StorageClient::new(None);
        let dest = dir.path().to_string_lossy().into_owned();
        let backups = list_for_database(&client, &dest, "MYDB").await.unwrap();

        let names: Vec<&str> = backups.iter().map(|b| b.file.name.as_str()).collect();
        assert_eq!(names, vec!["mydb_20240102_000000.sql", "mydb_20240101_000000.sql"]);
    }
}
