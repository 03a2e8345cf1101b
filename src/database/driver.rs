use crate::error::{BackupError, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::sync::mpsc;

/// Receives raw dump output in chunks. The other end encodes and writes the
/// artifact on the blocking pool.
pub type DumpSink = mpsc::Sender<Vec<u8>>;

/// Hands one chunk of dump output to the artifact writer.
pub async fn send_chunk(sink: &DumpSink, chunk: &[u8]) -> Result<()> {
    sink.send(chunk.to_vec())
        .await
        .map_err(|_| BackupError::Execution("backup file writer stopped".to_string()))
}

#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Short pre-flight check, bounded by the connect timeout.
    async fn test_connection(&self) -> Result<()>;
    /// Streams the raw dump into `sink`.
    async fn dump(&self, sink: &DumpSink) -> Result<()>;
    /// Restores from a backup artifact; the codec is taken from its extension.
    async fn restore(&self, backup_path: &Path) -> Result<()>;
    /// Extension of the uncompressed dump, including the leading dot.
    fn dump_extension(&self) -> String;
    /// Name the payload gets inside a zip archive.
    fn entry_name(&self) -> String;
    fn engine_name(&self) -> &'static str;
}

/// Collects everything sent to the returned sink, for driver tests.
#[cfg(test)]
pub fn capture() -> (DumpSink, tokio::task::JoinHandle<Vec<u8>>) {
    let (sink, mut rx) = mpsc::channel::<Vec<u8>>(8);
    let collector = tokio::spawn(async move {
        let mut out = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    });
    (sink, collector)
}
