use super::{RemoteFile, Storage};
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

const RCLONE_BIN: &str = "rclone";

/// Remote destinations, driven through the `rclone` executable.
pub struct RcloneStorage {
    config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    #[serde(rename = "Path")]
    path: String,
    #[serde(rename = "Size")]
    size: i64,
    #[serde(rename = "ModTime")]
    mod_time: DateTime<FixedOffset>,
    #[serde(rename = "IsDir", default)]
    is_dir: bool,
}

impl RcloneStorage {
    pub fn new(config: Option<PathBuf>) -> Self {
        Self { config }
    }

    async fn run<I, S>(&self, action: &str, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(RCLONE_BIN);
        if let Some(config) = &self.config {
            cmd.arg("--config").arg(config);
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running rclone for {}", action);
        let output = cmd
            .output()
            .await
            .map_err(|e| BackupError::Connectivity(format!("{}: starting rclone: {}", action, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            };
            return Err(BackupError::Connectivity(format!("{}: {}", action, detail)));
        }

        Ok(output.stdout)
    }
}

fn remote_path(dest: &str, file_name: &str) -> String {
    if dest.ends_with(':') || dest.ends_with('/') {
        format!("{}{}", dest, file_name)
    } else {
        format!("{}/{}", dest, file_name)
    }
}

#[async_trait]
impl Storage for RcloneStorage {
    async fn list(&self, dest: &str) -> Result<Vec<RemoteFile>> {
        let stdout = self
            .run("listing files", ["lsjson", "-R", "--files-only", dest])
            .await?;
        let entries: Vec<ListEntry> = serde_json::from_slice(&stdout)?;

        let mut files: Vec<RemoteFile> = entries
            .into_iter()
            .filter(|e| !e.is_dir)
            .map(|e| RemoteFile {
                name: e.path,
                size: e.size.max(0) as u64,
                mod_time: e.mod_time.with_timezone(&Utc),
            })
            .collect();

        files.sort_by(|a, b| b.mod_time.cmp(&a.mod_time));
        debug!("Listed {} file(s) in {}", files.len(), dest);
        Ok(files)
    }

    async fn upload(&self, local_path: &Path, dest: &str) -> Result<()> {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                BackupError::Connectivity(format!("invalid source file: {}", local_path.display()))
            })?;
        let target = remote_path(dest, &file_name);

        self.run(
            "uploading file",
            [OsStr::new("copyto"), local_path.as_os_str(), OsStr::new(&target)],
        )
        .await?;
        info!("Uploaded {} to {}", local_path.display(), target);
        Ok(())
    }

    async fn download(&self, dest: &str, file_name: &str, local_dir: &Path) -> Result<()> {
        let source = remote_path(dest, file_name);
        let target = local_dir.join(file_name);

        self.run(
            "downloading file",
            [OsStr::new("copyto"), OsStr::new(&source), target.as_os_str()],
        )
        .await?;
        info!("Downloaded {} to {}", source, target.display());
        Ok(())
    }

    async fn delete(&self, dest: &str, file_name: &str) -> Result<()> {
        let target = remote_path(dest, file_name);
        self.run("deleting file", ["deletefile", target.as_str()]).await?;
        info!("Deleted {}", target);
        Ok(())
    }

    async fn test_access(&self, dest: &str) -> Result<()> {
        self.run("cannot access destination", ["lsf", "--max-depth", "1", dest])
            .await?;
        Ok(())
    }
}
