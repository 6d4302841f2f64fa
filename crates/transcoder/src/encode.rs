use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::TranscodeError;
use crate::progress::{ProgressParser, TranscodeProgress};

/// How much trailing stderr to keep for error reports.
const STDERR_TAIL_BYTES: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Completed(PathBuf),
    /// The cancel token fired; the process was killed and its output removed.
    Cancelled,
}

/// Run one ffmpeg encode to completion.
///
/// Progress snapshots go to `progress_tx` with `try_send`; a lagging
/// consumer loses snapshots rather than stalling the read loop. Both pipes
/// are drained until EOF. On cancellation or a non-zero exit the partial
/// output file is deleted.
pub async fn run_encode(
    ffmpeg_path: &Path,
    args: &[String],
    output: &Path,
    total_duration: f64,
    cancel: &CancellationToken,
    progress_tx: Option<mpsc::Sender<TranscodeProgress>>,
) -> Result<TranscodeOutcome, TranscodeError> {
    let mut child = Command::new(ffmpeg_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| TranscodeError::FfmpegFailed(format!("spawn failed: {e}")))?;

    debug!(pid = ?child.id(), "ffmpeg started");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| TranscodeError::FfmpegFailed("stdout not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| TranscodeError::FfmpegFailed("stderr not captured".into()))?;
    let stderr_task = tokio::spawn(collect_tail(stderr, STDERR_TAIL_BYTES));

    let mut parser = ProgressParser::new(total_duration);
    let mut lines = BufReader::new(stdout).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                abort(&mut child, output).await;
                stderr_task.abort();
                return Ok(TranscodeOutcome::Cancelled);
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(snapshot) = parser.feed_line(&line) {
                        if let Some(tx) = &progress_tx {
                            let _ = tx.try_send(snapshot);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed reading ffmpeg progress; waiting for exit");
                    break;
                }
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            abort(&mut child, output).await;
            stderr_task.abort();
            return Ok(TranscodeOutcome::Cancelled);
        }
        status = child.wait() => status?,
    };

    let stderr_tail = stderr_task.await.unwrap_or_default();

    if status.success() {
        return Ok(TranscodeOutcome::Completed(output.to_path_buf()));
    }

    remove_partial(output).await;
    Err(TranscodeError::NonZeroExit {
        code: status.code(),
        stderr: stderr_tail.trim().to_string(),
    })
}

async fn abort(child: &mut Child, output: &Path) {
    if let Err(e) = child.start_kill() {
        warn!(error = %e, "failed to kill ffmpeg");
    }
    let _ = child.wait().await;
    remove_partial(output).await;
}

/// Delete a partially written output; a missing file is not an error.
pub async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial output"),
    }
}

/// Read `reader` to EOF, keeping only the last `limit` bytes.
async fn collect_tail<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> String {
    let mut tail: Vec<u8> = Vec::with_capacity(limit * 2);
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > limit * 2 {
                    tail.drain(..tail.len() - limit);
                }
            }
        }
    }
    if tail.len() > limit {
        tail.drain(..tail.len() - limit);
    }
    String::from_utf8_lossy(&tail).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn successful_run_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mkv");
        let ffmpeg = script(
            dir.path(),
            "ffmpeg",
            "printf 'fps=30\\nspeed=2x\\nout_time_us=5000000\\nprogress=continue\\n'\n\
             printf 'out_time_us=10000000\\nprogress=end\\n'\n\
             echo done > \"$1\"",
        );

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let args = vec![out.to_string_lossy().into_owned()];
        let outcome = run_encode(&ffmpeg, &args, &out, 10.0, &cancel, Some(tx))
            .await
            .unwrap();

        assert_eq!(outcome, TranscodeOutcome::Completed(out.clone()));
        let first = rx.recv().await.unwrap();
        assert!((first.progress - 0.5).abs() < 1e-9);
        let last = rx.recv().await.unwrap();
        assert_eq!(last.progress, 1.0);
    }

    #[tokio::test]
    async fn non_zero_exit_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mkv");
        let ffmpeg = script(
            dir.path(),
            "ffmpeg",
            "echo partial > \"$1\"\necho 'Encoder exploded' >&2\nexit 3",
        );

        let args = vec![out.to_string_lossy().into_owned()];
        let err = run_encode(&ffmpeg, &args, &out, 10.0, &CancellationToken::new(), None)
            .await
            .unwrap_err();

        match err {
            TranscodeError::NonZeroExit { code, stderr } => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("Encoder exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn cancellation_kills_process_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mkv");
        let ffmpeg = script(dir.path(), "ffmpeg", "echo partial > \"$1\"\nexec sleep 30");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let args = vec![out.to_string_lossy().into_owned()];
        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            run_encode(&ffmpeg, &args, &out, 10.0, &cancel, None),
        )
        .await
        .expect("cancel should end the run promptly")
        .unwrap();

        assert_eq!(outcome, TranscodeOutcome::Cancelled);
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.mkv");
        let err = run_encode(
            &dir.path().join("no-such-ffmpeg"),
            &[],
            &out,
            0.0,
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TranscodeError::FfmpegFailed(_)));
    }

    #[tokio::test]
    async fn stderr_tail_is_bounded() {
        let data = vec![b'a'; 10_000];
        let tail = collect_tail(&data[..], 100).await;
        assert_eq!(tail.len(), 100);
    }
}
