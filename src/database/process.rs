use super::driver::{send_chunk, DumpSink};
use super::CONNECT_TIMEOUT_SECS;
use crate::backup::compression::decode_with;
use crate::error::{BackupError, Result};
use std::io::Read;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, warn};

const BUFFER_SIZE: usize = 64 * 1024;

fn program_name(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

async fn collect_stderr<R: AsyncRead + Unpin>(mut stderr: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = stderr.read_to_end(&mut buf).await {
        warn!("Failed to read process stderr: {}", e);
    }
    String::from_utf8_lossy(&buf).trim().to_string()
}

fn command_failed(context: &str, status: ExitStatus, stderr: &str) -> BackupError {
    if stderr.is_empty() {
        BackupError::Execution(format!("{}: {}", context, status))
    } else {
        BackupError::Execution(format!("{}: {}", context, stderr))
    }
}

async fn copy_stdout(mut stdout: ChildStdout, sink: &DumpSink) -> Result<u64> {
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = stdout
            .read(&mut buffer)
            .await
            .map_err(|e| BackupError::Execution(format!("reading output: {}", e)))?;
        if n == 0 {
            break;
        }
        send_chunk(sink, &buffer[..n]).await?;
        total += n as u64;
    }
    Ok(total)
}

/// Runs a dump tool and streams its stdout into `sink`. On a non-zero exit
/// the tool's stderr becomes the error text.
pub async fn run_dump(mut cmd: Command, sink: &DumpSink) -> Result<()> {
    let program = program_name(&cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("Starting {}", program);
    let mut child = cmd
        .spawn()
        .map_err(|e| BackupError::Execution(format!("starting {}: {}", program, e)))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BackupError::Execution(format!("{}: stdout not captured", program)))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BackupError::Execution(format!("{}: stderr not captured", program)))?;
    let stderr_task = tokio::spawn(collect_stderr(stderr));

    let copied = copy_stdout(stdout, sink).await;
    if copied.is_err() {
        // nobody reads stdout any more, so the tool would block on it
        let _ = child.start_kill();
    }
    let status = child.wait().await?;
    let stderr_text = stderr_task.await.unwrap_or_default();

    let bytes = copied?;
    if !status.success() {
        return Err(command_failed("command failed", status, &stderr_text));
    }

    debug!("{} wrote {} bytes", program, bytes);
    Ok(())
}

/// Decodes `backup_path` and pipes it into a restore tool's stdin. The tool
/// is only started once the artifact has been opened and its first bytes
/// decoded.
pub async fn run_restore(mut cmd: Command, backup_path: &Path) -> Result<()> {
    let program = program_name(&cmd);

    // The decoders are blocking readers, so decoding runs on the blocking pool
    // and hands chunks over to this task.
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(8);
    let (ready_tx, ready_rx) = oneshot::channel::<()>();
    let path = backup_path.to_path_buf();
    let decoder = tokio::task::spawn_blocking(move || {
        decode_with(&path, |reader| {
            let mut buffer = vec![0u8; BUFFER_SIZE];
            let mut n = reader.read(&mut buffer)?;
            let _ = ready_tx.send(());
            while n > 0 {
                if tx.blocking_send(buffer[..n].to_vec()).is_err() {
                    break;
                }
                n = reader.read(&mut buffer)?;
            }
            Ok(())
        })
    });

    if ready_rx.await.is_err() {
        let decoded = decoder
            .await
            .map_err(|e| BackupError::Execution(format!("decoding task failed: {}", e)))?;
        decoded?;
        return Err(BackupError::Codec(format!("could not read {}", backup_path.display())));
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    debug!("Starting {}", program);
    let mut child = cmd
        .spawn()
        .map_err(|e| BackupError::Execution(format!("starting {}: {}", program, e)))?;
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| BackupError::Execution(format!("{}: stdin not captured", program)))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BackupError::Execution(format!("{}: stderr not captured", program)))?;
    let stderr_task = tokio::spawn(collect_stderr(stderr));

    let mut write_error = None;
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            write_error = Some(e);
            break;
        }
    }
    drop(rx);
    drop(stdin);

    let decoded = decoder
        .await
        .map_err(|e| BackupError::Execution(format!("decoding task failed: {}", e)))?;
    let status = child.wait().await?;
    let stderr_text = stderr_task.await.unwrap_or_default();

    decoded?;
    if !status.success() {
        return Err(command_failed("restore command failed", status, &stderr_text));
    }
    if let Some(e) = write_error {
        return Err(BackupError::Execution(format!("writing to {}: {}", program, e)));
    }
    Ok(())
}

/// Runs a short connectivity check, killing the client if it outlives the
/// connect timeout.
pub async fn probe(mut cmd: Command) -> Result<()> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let limit = Duration::from_secs(CONNECT_TIMEOUT_SECS);
    let output = match timeout(limit, cmd.output()).await {
        Err(_) => {
            return Err(BackupError::Connectivity(format!(
                "connection timed out after {}s",
                CONNECT_TIMEOUT_SECS
            )))
        }
        Ok(Err(e)) => return Err(BackupError::Connectivity(format!("connection failed: {}", e))),
        Ok(Ok(output)) => output,
    };

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        Err(BackupError::Connectivity(format!("connection failed: {}", output.status)))
    } else {
        Err(BackupError::Connectivity(format!("connection failed: {}", stderr)))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backup::compression::{Compression, Encoder};
    use crate::database::driver::capture;
    use std::fs::File;
    use std::io::{BufWriter, Write};
    use tempfile::tempdir;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_dump_streams_stdout() {
        let (sink, output) = capture();
        run_dump(shell("printf 'CREATE TABLE t;\\n'"), &sink).await.unwrap();
        drop(sink);
        assert_eq!(output.await.unwrap(), b"CREATE TABLE t;\n");
    }

    #[tokio::test]
    async fn test_dump_failure_keeps_stderr() {
        let (sink, _output) = capture();
        let err = run_dump(shell("echo 'Access denied for user' >&2; exit 2"), &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::Execution(_)));
        assert_eq!(err.to_string(), "command failed: Access denied for user");
    }

    #[tokio::test]
    async fn test_restore_feeds_decoded_stdin() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("mydb_20240115_143022.sql.gz");
        let target = dir.path().join("restored.sql");

        let file = BufWriter::new(File::create(&artifact).unwrap());
        let mut encoder = Encoder::new(file, Compression::Gzip, "mydb.sql").unwrap();
        encoder.write_all(b"INSERT INTO t VALUES (1);\n").unwrap();
        encoder.finish().unwrap();

        let script = format!("cat > '{}'", target.display());
        run_restore(shell(&script), &artifact).await.unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"INSERT INTO t VALUES (1);\n");
    }

    #[tokio::test]
    async fn test_restore_failure_keeps_stderr() {
        let dir = tempdir().unwrap();
        let artifact = dir.path().join("mydb_20240115_143022.sql");
        std::fs::write(&artifact, b"SELECT 1;\n").unwrap();

        let err = run_restore(shell("cat > /dev/null; echo 'ERROR 1064' >&2; exit 1"), &artifact)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "restore command failed: ERROR 1064");
    }

    #[tokio::test]
    async fn test_probe_reports_stderr() {
        probe(shell("exit 0")).await.unwrap();
        let err = probe(shell("echo 'could not connect' >&2; exit 1")).await.unwrap_err();
        assert_eq!(err.to_string(), "connection failed: could not connect");
    }

    #[tokio::test]
    async fn test_dump_stops_when_writer_goes_away() {
        let (sink, rx) = mpsc::channel::<Vec<u8>>(1);
        drop(rx);
        let err = run_dump(shell("yes 'INSERT INTO t VALUES (1);'"), &sink)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "backup file writer stopped");
    }

    #[tokio::test]
    async fn test_unreadable_artifact_never_starts_client() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("client-started");
        let script = format!("touch '{}'; cat > /dev/null", marker.display());

        let empty_zip = dir.path().join("mydb_20240115_143022.sql.zip");
        zip::ZipWriter::new(File::create(&empty_zip).unwrap()).finish().unwrap();
        let err = run_restore(shell(&script), &empty_zip).await.unwrap_err();
        assert!(matches!(err, BackupError::Codec(_)));

        let not_gzip = dir.path().join("mydb_20240115_143022.sql.gz");
        std::fs::write(&not_gzip, b"plain text, no gzip header").unwrap();
        assert!(run_restore(shell(&script), &not_gzip).await.is_err());

        assert!(!marker.exists());
    }
}
