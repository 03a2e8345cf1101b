use crate::backup::progress::{BackupStep, ProgressEvent};
use crate::config::DatabaseConfig;
use crate::database::create_driver;
use crate::error::{BackupError, Result};
use crate::storage::{ensure_plain_name, Storage};
use std::io;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Where the artifact to restore comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSource {
    /// A file name at the database's destination.
    Remote(String),
    /// An artifact already on this machine; the download step is skipped.
    Local(PathBuf),
}

async fn emit(progress: &mpsc::Sender<ProgressEvent>, event: ProgressEvent) {
    let _ = progress.send(event).await;
}

async fn failed(
    progress: &mpsc::Sender<ProgressEvent>,
    name: &str,
    step: BackupStep,
    err: BackupError,
) -> Result<()> {
    error!("{}: {} failed: {}", name, step, err);
    emit(progress, ProgressEvent::failed(name, step, &err)).await;
    Err(err)
}

/// Restores one database from a backup artifact. The codec comes from the
/// artifact's own extension, not from the current configuration. A
/// downloaded artifact lives in a temporary directory removed on return.
pub async fn run_restore(
    name: &str,
    config: &DatabaseConfig,
    storage: &dyn Storage,
    source: RestoreSource,
    progress: &mpsc::Sender<ProgressEvent>,
) -> Result<()> {
    let (artifact, _workdir) = match source {
        RestoreSource::Remote(file_name) => {
            emit(progress, ProgressEvent::started(name, BackupStep::Downloading)).await;
            if let Err(e) = ensure_plain_name(&file_name) {
                return failed(progress, name, BackupStep::Downloading, e).await;
            }
            let dir = match tempfile::Builder::new().prefix("dbvault-restore-").tempdir() {
                Ok(dir) => dir,
                Err(e) => return failed(progress, name, BackupStep::Downloading, e.into()).await,
            };
            if let Err(e) = storage.download(&config.dest, &file_name, dir.path()).await {
                return failed(progress, name, BackupStep::Downloading, e).await;
            }
            info!("Downloaded {} from {}", file_name, config.dest);
            emit(
                progress,
                ProgressEvent::completed(name, BackupStep::Downloading, format!("Downloaded {}", file_name)),
            )
            .await;
            (dir.path().join(&file_name), Some(dir))
        }
        RestoreSource::Local(path) => {
            if !path.is_file() {
                let err = BackupError::Filesystem(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("backup file not found: {}", path.display()),
                ));
                return failed(progress, name, BackupStep::Restoring, err).await;
            }
            (path, None)
        }
    };

    emit(progress, ProgressEvent::started(name, BackupStep::Restoring)).await;
    let driver = create_driver(config);
    if let Err(e) = driver.restore(&artifact).await {
        return failed(progress, name, BackupStep::Restoring, e).await;
    }

    info!("Restored {} into {} ({})", artifact.display(), name, driver.engine_name());
    let message = format!("Restored from {}", artifact.file_name().unwrap_or_default().to_string_lossy());
    emit(progress, ProgressEvent::completed(name, BackupStep::Restoring, message).finishing()).await;
    Ok(())
}
