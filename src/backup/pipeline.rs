use crate::backup::compression::Encoder;
use crate::backup::coordinator::RetentionPlan;
use crate::backup::naming::backup_filename;
use crate::backup::progress::{BackupState, BackupStep, ProgressEvent};
use crate::backup::retention;
use crate::config::DatabaseConfig;
use crate::database::{create_driver, DumpSink};
use crate::error::{BackupError, Result};
use crate::storage::{RemoteFile, Storage};
use chrono::Local;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const DUMP_QUEUE: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupOptions {
    /// Dump only; keep the artifact locally and skip upload and retention.
    pub dry_run: bool,
    pub skip_retention: bool,
}

/// A freshly dumped backup in its own temporary directory. The directory is
/// removed when the artifact is dropped, unless it was persisted.
#[derive(Debug)]
pub struct BackupArtifact {
    pub name: String,
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub duration: Duration,
    workdir: TempDir,
}

impl BackupArtifact {
    /// Leaves the artifact on disk and returns its path.
    pub fn persist(self) -> PathBuf {
        let _ = self.workdir.keep();
        self.path
    }

    pub fn size_mb(&self) -> f64 {
        self.size as f64 / 1024.0 / 1024.0
    }
}

/// Dumps `name` through its codec into a new temporary directory.
pub async fn dump(name: &str, config: &DatabaseConfig) -> Result<BackupArtifact> {
    let start = Instant::now();
    let workdir = tempfile::Builder::new()
        .prefix("dbvault-")
        .tempdir()
        .map_err(|e| BackupError::Filesystem(std::io::Error::new(e.kind(), format!("creating temp dir: {}", e))))?;

    let driver = create_driver(config);
    let filename = backup_filename(
        name,
        Local::now().naive_local(),
        &driver.dump_extension(),
        config.compression,
    );
    let path = workdir.path().join(&filename);

    // Compression and file writes run on the blocking pool; the driver only
    // feeds chunks into the channel.
    let (sink, mut chunks): (DumpSink, _) = mpsc::channel(DUMP_QUEUE);
    let compression = config.compression;
    let entry_name = driver.entry_name();
    let target = path.clone();
    let writer = tokio::task::spawn_blocking(move || -> Result<()> {
        let file = BufWriter::new(File::create(&target)?);
        let mut encoder = Encoder::new(file, compression, &entry_name)?;
        while let Some(chunk) = chunks.blocking_recv() {
            encoder.write_all(&chunk)?;
        }
        encoder.finish()?;
        Ok(())
    });

    let dumped = driver.dump(&sink).await;
    drop(sink);
    let written = writer
        .await
        .map_err(|e| BackupError::Execution(format!("backup writer task failed: {}", e)))?;
    // a failed writer also shows up in the driver as a closed channel
    written?;
    dumped?;

    let size = fs::metadata(&path)?.len();
    Ok(BackupArtifact {
        name: name.to_string(),
        filename,
        path,
        size,
        duration: start.elapsed(),
        workdir,
    })
}

/// Forwards events to the shared stream and keeps the pipeline's own state.
struct Reporter<'a> {
    state: BackupState,
    progress: &'a mpsc::Sender<ProgressEvent>,
}

impl Reporter<'_> {
    async fn emit(&mut self, event: ProgressEvent) {
        self.state.record(&event);
        if self.progress.send(event).await.is_err() {
            warn!("Progress stream closed; {} keeps running", self.state.db_name);
        }
    }

    async fn start(&mut self, step: BackupStep) {
        let event = ProgressEvent::started(&self.state.db_name, step);
        self.emit(event).await;
    }

    async fn complete(&mut self, step: BackupStep, message: String) {
        let event = ProgressEvent::completed(&self.state.db_name, step, message);
        self.emit(event).await;
    }

    async fn skip(&mut self, step: BackupStep, message: &str) {
        let event = ProgressEvent::skipped(&self.state.db_name, step, message);
        self.emit(event).await;
    }

    async fn finish_complete(&mut self, step: BackupStep, message: String) {
        let event = ProgressEvent::completed(&self.state.db_name, step, message).finishing();
        self.emit(event).await;
    }

    async fn finish_skip(&mut self, step: BackupStep, message: &str) {
        let event = ProgressEvent::skipped(&self.state.db_name, step, message).finishing();
        self.emit(event).await;
    }

    async fn fail(mut self, step: BackupStep, err: BackupError) -> BackupState {
        error!("{}: {} failed: {}", self.state.db_name, step, err);
        let event = ProgressEvent::failed(&self.state.db_name, step, &err);
        self.emit(event).await;
        self.state
    }
}

/// Runs Dumping, Uploading and Retention for one database. Any failure ends
/// the pipeline at that step; the local artifact is removed on every path
/// except a dry run.
pub async fn run_pipeline(
    name: &str,
    config: &DatabaseConfig,
    storage: &dyn Storage,
    opts: BackupOptions,
    plan: Option<&RetentionPlan>,
    progress: &mpsc::Sender<ProgressEvent>,
) -> BackupState {
    let mut reporter = Reporter {
        state: BackupState::new(name),
        progress,
    };

    reporter.start(BackupStep::Dumping).await;
    let artifact = match dump(name, config).await {
        Ok(artifact) => artifact,
        Err(e) => return reporter.fail(BackupStep::Dumping, e).await,
    };
    reporter.state.artifact = Some(artifact.path.clone());
    info!(
        "Dumped {} to {} ({} bytes in {:.1}s)",
        artifact.name,
        artifact.filename,
        artifact.size,
        artifact.duration.as_secs_f64()
    );
    let message = format!("Dumped {} ({:.2} MB)", artifact.filename, artifact.size_mb());
    reporter.complete(BackupStep::Dumping, message).await;

    if opts.dry_run {
        let path = artifact.persist();
        let message = format!("Upload skipped (dry-run), file at {}", path.display());
        reporter.skip(BackupStep::Uploading, &message).await;
        reporter
            .finish_skip(BackupStep::Retention, "Retention skipped (dry-run)")
            .await;
        return reporter.state;
    }

    reporter.start(BackupStep::Uploading).await;
    let uploaded = storage.upload(&artifact.path, &config.dest).await;
    drop(artifact);
    reporter.state.artifact = None;
    if let Err(e) = uploaded {
        return reporter.fail(BackupStep::Uploading, e).await;
    }
    reporter
        .complete(BackupStep::Uploading, format!("Saved to {}", config.dest))
        .await;

    if opts.skip_retention {
        reporter
            .finish_skip(BackupStep::Retention, "Skipped (--skip-retention)")
            .await;
        return reporter.state;
    }
    if !config.retention.is_enabled() {
        reporter
            .finish_skip(BackupStep::Retention, "No retention policy")
            .await;
        return reporter.state;
    }

    reporter.start(BackupStep::Retention).await;
    // The new backup is in place now, so the rules run again against what is
    // actually stored. The plan only stands in when the destination cannot
    // be listed.
    let to_delete = match storage.list(&config.dest).await {
        Ok(files) => retention::apply(&files, name, &config.retention, 0),
        Err(e) => match plan.and_then(|p| p.get(name)) {
            Some(planned) => {
                warn!("Listing {} after upload failed, using the planned deletions: {}", config.dest, e);
                planned.clone()
            }
            None => return reporter.fail(BackupStep::Retention, e).await,
        },
    };

    if to_delete.is_empty() {
        reporter
            .finish_skip(BackupStep::Retention, "No old backups to delete")
            .await;
        return reporter.state;
    }

    match delete_all(storage, &config.dest, &to_delete).await {
        Ok(deleted) => {
            reporter
                .finish_complete(BackupStep::Retention, format!("Deleted {} old backup(s)", deleted))
                .await;
            reporter.state
        }
        Err(e) => reporter.fail(BackupStep::Retention, e).await,
    }
}

/// Deletes every file, continuing past failures, and reports them together.
async fn delete_all(storage: &dyn Storage, dest: &str, files: &[RemoteFile]) -> Result<usize> {
    let mut deleted = 0;
    let mut failures = Vec::new();

    for file in files {
        match storage.delete(dest, &file.name).await {
            Ok(()) => deleted += 1,
            Err(e) => {
                warn!("Failed to delete {}: {}", file.name, e);
                failures.push(format!("{}: {}", file.name, e));
            }
        }
    }

    if failures.is_empty() {
        Ok(deleted)
    } else {
        Err(BackupError::Connectivity(format!(
            "deleted {} of {} old backup(s); {}",
            deleted,
            files.len(),
            failures.join("; ")
        )))
    }
}

