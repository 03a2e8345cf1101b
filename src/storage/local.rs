use super::{ensure_plain_name, RemoteFile, Storage};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

/// Destination that is a plain directory on this machine.
pub struct LocalStorage;

fn storage_error(action: &str, err: std::io::Error) -> BackupError {
    BackupError::Connectivity(format!("{}: {}", action, err))
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list(&self, dest: &str) -> Result<Vec<RemoteFile>> {
        let mut entries = match fs::read_dir(dest).await {
            Ok(entries) => entries,
            // nothing has been uploaded yet
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("listing files", e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("listing files", e))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| storage_error("listing files", e))?;
            if !metadata.is_file() {
                continue;
            }
            let mod_time = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            files.push(RemoteFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                mod_time,
            });
        }

        files.sort_by(|a, b| b.mod_time.cmp(&a.mod_time));
        debug!("Listed {} file(s) in {}", files.len(), dest);
        Ok(files)
    }

    async fn upload(&self, local_path: &Path, dest: &str) -> Result<()> {
        let file_name = local_path.file_name().ok_or_else(|| {
            BackupError::Connectivity(format!("invalid source file: {}", local_path.display()))
        })?;

        fs::create_dir_all(dest)
            .await
            .map_err(|e| storage_error("creating destination", e))?;
        let target = Path::new(dest).join(file_name);
        fs::copy(local_path, &target)
            .await
            .map_err(|e| storage_error("uploading file", e))?;

        info!("Copied {} to {}", local_path.display(), target.display());
        Ok(())
    }

    async fn download(&self, dest: &str, file_name: &str, local_dir: &Path) -> Result<()> {
        ensure_plain_name(file_name)?;
        let source = Path::new(dest).join(file_name);
        let target = local_dir.join(file_name);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error("creating download directory", e))?;
        }
        fs::copy(&source, &target)
            .await
            .map_err(|e| storage_error("downloading file", e))?;

        info!("Copied {} to {}", source.display(), target.display());
        Ok(())
    }

    async fn delete(&self, dest: &str, file_name: &str) -> Result<()> {
        ensure_plain_name(file_name)?;
        let target = Path::new(dest).join(file_name);
        fs::remove_file(&target)
            .await
            .map_err(|e| storage_error("deleting file", e))?;
        info!("Deleted {}", target.display());
        Ok(())
    }

    async fn test_access(&self, dest: &str) -> Result<()> {
        fs::read_dir(dest)
            .await
            .map_err(|e| storage_error("cannot access destination", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upload_list_download_delete() {
        let work = tempdir().unwrap();
        let dest_dir = work.path().join("dest");
        let dest = dest_dir.to_string_lossy().into_owned();
        let source = work.path().join("mydb_20240115_143022.sql");
        std::fs::write(&source, b"SELECT 1;").unwrap();

        let storage = LocalStorage;
        assert!(storage.list(&dest).await.unwrap().is_empty());
        assert!(storage.test_access(&dest).await.is_err());

        storage.upload(&source, &dest).await.unwrap();
        storage.test_access(&dest).await.unwrap();

        let files = storage.list(&dest).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "mydb_20240115_143022.sql");
        assert_eq!(files[0].size, 9);

        let download_dir = work.path().join("restore");
        storage
            .download(&dest, "mydb_20240115_143022.sql", &download_dir)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(download_dir.join("mydb_20240115_143022.sql")).unwrap(),
            b"SELECT 1;"
        );

        storage.delete(&dest, "mydb_20240115_143022.sql").await.unwrap();
        assert!(storage.list(&dest).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_missing_file_fails() {
        let dir = tempdir().unwrap();
        let dest = dir.path().to_string_lossy().into_owned();
        let err = LocalStorage.delete(&dest, "nope.sql").await.unwrap_err();
        assert!(matches!(err, BackupError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_names_cannot_leave_destination() {
        let work = tempdir().unwrap();
        let dest_dir = work.path().join("dest");
        std::fs::create_dir(&dest_dir).unwrap();
        let outside = work.path().join("outside.sql");
        std::fs::write(&outside, b"keep me").unwrap();
        let dest = dest_dir.to_string_lossy().into_owned();

        let err = LocalStorage.delete(&dest, "../outside.sql").await.unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
        assert!(outside.exists());

        let err = LocalStorage
            .download(&dest, "../outside.sql", &work.path().join("restore"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }
}
