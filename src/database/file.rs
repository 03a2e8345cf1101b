use super::driver::{send_chunk, DatabaseDriver, DumpSink};
use crate::backup::compression::decode_with;
use crate::config::DatabaseConfig;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

const BUFFER_SIZE: usize = 64 * 1024;

/// A database that lives in a single file, such as SQLite. Backups are
/// byte-identical copies.
pub struct FileDriver {
    path: PathBuf,
}

impl FileDriver {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            path: config.path.clone().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl DatabaseDriver for FileDriver {
    async fn test_connection(&self) -> Result<()> {
        tokio::fs::metadata(&self.path).await.map_err(|e| {
            BackupError::Connectivity(format!("cannot access {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }

    async fn dump(&self, sink: &DumpSink) -> Result<()> {
        info!("Copying {}", self.path.display());
        let mut source = tokio::fs::File::open(&self.path).await.map_err(|e| {
            BackupError::Filesystem(io::Error::new(
                e.kind(),
                format!("opening source file {}: {}", self.path.display(), e),
            ))
        })?;

        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = source.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            send_chunk(sink, &buffer[..n]).await?;
            total += n as u64;
        }

        debug!("Copied {} bytes from {}", total, self.path.display());
        Ok(())
    }

    async fn restore(&self, backup_path: &Path) -> Result<()> {
        let source = backup_path.to_path_buf();
        let target = self.path.clone();
        info!("Restoring {} to {}", source.display(), target.display());

        tokio::task::spawn_blocking(move || {
            decode_with(&source, |reader| {
                let mut dst = BufWriter::new(File::create(&target)?);
                io::copy(reader, &mut dst)?;
                dst.flush()?;
                Ok(())
            })
        })
        .await
        .map_err(|e| BackupError::Execution(format!("restore task failed: {}", e)))?
    }

    fn dump_extension(&self) -> String {
        match self.path.extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy()),
            None => ".bak".to_string(),
        }
    }

    fn entry_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "backup.bak".to_string())
    }

    fn engine_name(&self) -> &'static str {
        "File"
    }
}
