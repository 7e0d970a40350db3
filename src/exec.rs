// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subprocess launcher with line streaming, progress extraction, and
//! credential redaction.
//!
//! Every external tool (dump, import, remote shell, file mirror) runs
//! through here. Output streams are drained by dedicated tasks that
//! forward each line as a `Log` event tagged with the current phase, and
//! the launcher always joins those tasks *after* waiting on the child:
//! waiting on process exit alone loses whatever the scanners had not yet
//! flushed.
//!
//! Cancellation is observed before launch and while waiting; a cancelled
//! child is killed and the call returns [`SyncError::Cancelled`].
//!
//! # Credential redaction
//!
//! Command lines are announced by the *callers* via [`redact_args`], which
//! rewrites any attached `-p<password>` argument to `-p[REDACTED]`. The
//! child always receives the real argument vector; redaction happens only
//! at log construction, never retroactively.

use crate::error::{Result, SyncError};
use crate::events::EventSender;
use futures::future::join_all;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::debug;

/// How many trailing stderr lines are kept for the error message when a
/// tool exits non-zero.
const STDERR_TAIL_LINES: usize = 3;

/// Matches a percentage anywhere in a progress line, e.g. the `100%` in
/// `32,768 100%    2.74MB/s    0:00:00 (xfr#1, to-chk=0/1)`.
static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)%").unwrap());

/// Space-joined argument list with any attached `-p<password>` replaced by
/// `-p[REDACTED]`, safe to emit in log events.
pub fn redact_args(args: &[String]) -> String {
    args.iter()
        .map(|a| {
            if a.starts_with("-p") && a.len() > 2 {
                "-p[REDACTED]".to_string()
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn command_label(cmd: &Command) -> String {
    cmd.as_std().get_program().to_string_lossy().into_owned()
}

fn spawn_checked(cmd: &mut Command, label: &str) -> Result<Child> {
    debug!(command = %label, "spawning subprocess");
    cmd.spawn().map_err(|e| SyncError::launch(label, e))
}

/// Run `cmd`, streaming its stderr (and, unless `stderr_only`, its stdout)
/// line-by-line as `Log` events for `phase`.
///
/// With `stderr_only` set the caller owns stdout and must have configured
/// it (to a capture file, or null); only stderr is scanned.
pub async fn stream_command(
    cmd: &mut Command,
    phase: u8,
    events: &EventSender,
    stderr_only: bool,
) -> Result<()> {
    let label = command_label(cmd);
    if events.is_cancelled() {
        return Err(SyncError::Cancelled);
    }

    cmd.stderr(Stdio::piped());
    if !stderr_only {
        cmd.stdout(Stdio::piped());
    }
    let mut child = spawn_checked(cmd, &label)?;

    let mut scanners: Vec<JoinHandle<Vec<String>>> = Vec::new();
    if let Some(stderr) = child.stderr.take() {
        scanners.push(spawn_line_scanner(stderr, phase, events.clone(), true));
    }
    if let Some(stdout) = child.stdout.take() {
        scanners.push(spawn_line_scanner(stdout, phase, events.clone(), false));
    }

    wait_with_cancel(&mut child, scanners, events, &label).await
}

/// Run `cmd`, parsing both output streams for percentage updates.
///
/// Streams are split on `\r` as well as `\n` so progress lines that
/// rewrite themselves in place are each seen. A line matching a percent
/// pattern becomes a `Progress` event at `base + pct/100 * slice`
/// (mapping the tool's local percentage onto the phase's global progress)
/// and is not logged; all other non-empty lines pass through as `Log`.
pub async fn stream_command_with_progress(
    cmd: &mut Command,
    phase: u8,
    events: &EventSender,
    base: f64,
    slice: f64,
) -> Result<()> {
    let label = command_label(cmd);
    if events.is_cancelled() {
        return Err(SyncError::Cancelled);
    }

    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = spawn_checked(cmd, &label)?;

    let mut scanners: Vec<JoinHandle<Vec<String>>> = Vec::new();
    if let Some(stderr) = child.stderr.take() {
        scanners.push(spawn_progress_scanner(stderr, phase, events.clone(), base, slice, true));
    }
    if let Some(stdout) = child.stdout.take() {
        scanners.push(spawn_progress_scanner(stdout, phase, events.clone(), base, slice, false));
    }

    wait_with_cancel(&mut child, scanners, events, &label).await
}

/// Run `cmd` with `input` pumped into its stdin, emitting at most one
/// `Progress` event per whole percent of `total_bytes` consumed. Used by
/// the import phase, where the reader is the (possibly decompressed and
/// comment-stripped) dump and `total_bytes` is the artifact's on-disk
/// size. stderr is streamed as `Log` events; the caller owns stdout.
pub async fn stream_command_with_stdin(
    cmd: &mut Command,
    phase: u8,
    events: &EventSender,
    input: Box<dyn std::io::Read + Send>,
    input_path: &Path,
    total_bytes: u64,
) -> Result<()> {
    let label = command_label(cmd);
    if events.is_cancelled() {
        return Err(SyncError::Cancelled);
    }

    cmd.stdin(Stdio::piped()).stderr(Stdio::piped());
    let mut child = spawn_checked(cmd, &label)?;

    let mut scanners: Vec<JoinHandle<Vec<String>>> = Vec::new();
    if let Some(stderr) = child.stderr.take() {
        scanners.push(spawn_line_scanner(stderr, phase, events.clone(), true));
    }

    // Bridge the blocking reader chain onto the async child stdin: a
    // blocking task reads chunks, the pump below writes them and meters
    // progress against the artifact size.
    let (chunk_tx, mut chunk_rx) = tokio::sync::mpsc::channel::<std::io::Result<Vec<u8>>>(8);
    let producer = tokio::task::spawn_blocking(move || {
        let mut input = input;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if chunk_tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = chunk_tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });

    let mut stdin = child.stdin.take();
    let pump = async {
        let mut read_err: Option<std::io::Error> = None;
        let mut written: u64 = 0;
        let mut last_pct: u64 = 0;
        while let Some(chunk) = chunk_rx.recv().await {
            match chunk {
                Ok(data) => {
                    let Some(w) = stdin.as_mut() else { break };
                    // A write failure means the child went away; its exit
                    // status carries the real diagnosis.
                    if w.write_all(&data).await.is_err() {
                        break;
                    }
                    written += data.len() as u64;
                    if total_bytes > 0 {
                        let pct = written * 100 / total_bytes;
                        if pct != last_pct && pct <= 100 {
                            last_pct = pct;
                            if events.progress(phase, pct as f64 / 100.0).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    read_err = Some(e);
                    break;
                }
            }
        }
        drop(stdin.take()); // EOF to the child
        read_err
    };

    let read_err = tokio::select! {
        err = pump => err,
        _ = events.cancelled() => {
            let _ = child.kill().await;
            let _ = join_all(scanners).await;
            return Err(SyncError::Cancelled);
        }
    };
    // Unblock the producer if the pump bailed out mid-stream, then let
    // it finish before touching the child's exit status.
    drop(chunk_rx);
    let _ = producer.await;

    let result = wait_with_cancel(&mut child, scanners, events, &label).await;
    if let Some(e) = read_err {
        return Err(SyncError::io("read", input_path, e));
    }
    result
}

/// Wait for the child, observing cancellation, then barrier on every
/// scanner task so no output line is lost, then map the exit status.
async fn wait_with_cancel(
    child: &mut Child,
    scanners: Vec<JoinHandle<Vec<String>>>,
    events: &EventSender,
    label: &str,
) -> Result<()> {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = events.cancelled() => {
            let _ = child.kill().await;
            let _ = join_all(scanners).await;
            return Err(SyncError::Cancelled);
        }
    };

    let tails = join_all(scanners).await;
    let status = status.map_err(|e| SyncError::launch(label, e))?;

    if status.success() {
        Ok(())
    } else {
        let tail: Vec<String> = tails.into_iter().flatten().flatten().collect();
        Err(SyncError::exit(label, status.to_string(), &tail))
    }
}

/// Forward each line of `stream` as a `Log` event. Returns the trailing
/// lines when `keep_tail` is set (stderr), for error reporting.
fn spawn_line_scanner(
    stream: impl AsyncRead + Unpin + Send + 'static,
    phase: u8,
    events: EventSender,
    keep_tail: bool,
) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut tail: Vec<String> = Vec::new();
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if keep_tail {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line.clone());
            }
            if events.log(phase, line).await.is_err() {
                break;
            }
        }
        tail
    })
}

/// Like [`spawn_line_scanner`], but splits on `\r` as well as `\n` and
/// turns percent lines into `Progress` events instead of logs.
fn spawn_progress_scanner(
    stream: impl AsyncRead + Unpin + Send + 'static,
    phase: u8,
    events: EventSender,
    base: f64,
    slice: f64,
    keep_tail: bool,
) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut tail: Vec<String> = Vec::new();
        let mut reader = BufReader::new(stream);
        let mut buf: Vec<u8> = Vec::new();
        let mut chunk = vec![0u8; 8192];

        'read: loop {
            let n = match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(_) => break,
            };
            buf.extend_from_slice(&chunk[..n]);

            let mut consumed = 0;
            while let Some(pos) = buf[consumed..]
                .iter()
                .position(|&b| b == b'\r' || b == b'\n')
            {
                let line = buf[consumed..consumed + pos].to_vec();
                consumed += pos + 1;
                if !emit_progress_line(&line, phase, &events, base, slice, keep_tail, &mut tail)
                    .await
                {
                    break 'read;
                }
            }
            buf.drain(..consumed);
        }

        if !buf.is_empty() {
            let line = std::mem::take(&mut buf);
            let _ =
                emit_progress_line(&line, phase, &events, base, slice, keep_tail, &mut tail).await;
        }
        tail
    })
}

/// Returns false when the consumer is gone and scanning should stop.
async fn emit_progress_line(
    line: &[u8],
    phase: u8,
    events: &EventSender,
    base: f64,
    slice: f64,
    keep_tail: bool,
    tail: &mut Vec<String>,
) -> bool {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }

    if let Some(caps) = PERCENT_RE.captures(trimmed) {
        if let Ok(pct) = caps[1].parse::<u32>() {
            let p = (base + (pct as f64 / 100.0) * slice).min(1.0);
            // Raw progress lines are not worth logging.
            return events.progress(phase, p).await.is_ok();
        }
    }

    if keep_tail {
        if tail.len() == STDERR_TAIL_LINES {
            tail.remove(0);
        }
        tail.push(trimmed.to_string());
    }
    events.log(phase, trimmed).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, EventKind};
    use tokio::sync::watch;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    /// Run `f` with a live event channel, returning everything emitted.
    async fn with_events<F, Fut>(f: F) -> (Result<()>, Vec<Event>)
    where
        F: FnOnce(EventSender) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (events, mut rx) = EventSender::channel(cancel_rx);
        let collector = tokio::spawn(async move {
            let mut all = Vec::new();
            while let Some(ev) = rx.recv().await {
                all.push(ev);
            }
            all
        });
        let res = f(events).await;
        (res, collector.await.unwrap())
    }

    #[test]
    fn test_redact_attached_password() {
        let args = vec![
            "-h".to_string(),
            "localhost".to_string(),
            "-psecret".to_string(),
            "mydb".to_string(),
        ];
        assert_eq!(redact_args(&args), "-h localhost -p[REDACTED] mydb");
    }

    #[test]
    fn test_redact_leaves_bare_p_and_uppercase_port() {
        let args = vec!["-p".to_string(), "-P3306".to_string()];
        assert_eq!(redact_args(&args), "-p -P3306");
    }

    #[tokio::test]
    async fn test_streams_stdout_and_stderr_lines() {
        let (res, events) = with_events(|ev| async move {
            stream_command(&mut sh("echo out; echo err >&2"), 4, &ev, false).await
        })
        .await;
        res.unwrap();

        let logs: Vec<&str> = events
            .iter()
            .filter(|e| e.kind == EventKind::Log)
            .map(|e| e.message.as_str())
            .collect();
        assert!(logs.contains(&"out"));
        assert!(logs.contains(&"err"));
        assert!(events.iter().all(|e| e.phase == 4));
    }

    #[tokio::test]
    async fn test_all_lines_drained_before_return() {
        // The barrier on scanner join must not drop trailing output.
        let (res, events) = with_events(|ev| async move {
            stream_command(&mut sh("for i in 1 2 3 4 5; do echo line$i; done"), 1, &ev, false)
                .await
        })
        .await;
        res.unwrap();
        let logs = events.iter().filter(|e| e.kind == EventKind::Log).count();
        assert_eq!(logs, 5);
    }

    #[tokio::test]
    async fn test_nonzero_exit_carries_stderr_tail() {
        let (res, _events) = with_events(|ev| async move {
            stream_command(&mut sh("echo boom >&2; exit 3"), 1, &ev, false).await
        })
        .await;
        let err = res.unwrap_err();
        match err {
            SyncError::ToolExit { ref detail, .. } => assert!(detail.contains("boom")),
            other => panic!("expected ToolExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_binary_is_launch_error() {
        let (res, _) = with_events(|ev| async move {
            let mut cmd = Command::new("definitely-not-a-real-binary-xyz");
            stream_command(&mut cmd, 1, &ev, false).await
        })
        .await;
        assert!(matches!(res.unwrap_err(), SyncError::ToolLaunch { .. }));
    }

    #[tokio::test]
    async fn test_progress_lines_become_progress_events() {
        let (res, events) = with_events(|ev| async move {
            stream_command_with_progress(
                &mut sh(r"printf 'file 12%%\r50%%\rdone 100%%\nplain line\n'"),
                6,
                &ev,
                0.0,
                1.0,
            )
            .await
        })
        .await;
        res.unwrap();

        let progress: Vec<f64> = events
            .iter()
            .filter(|e| e.kind == EventKind::Progress)
            .map(|e| e.progress)
            .collect();
        assert_eq!(progress, vec![0.12, 0.50, 1.0]);

        // Matched lines are suppressed; the plain line is logged.
        let logs: Vec<&str> = events
            .iter()
            .filter(|e| e.kind == EventKind::Log)
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(logs, vec!["plain line"]);
    }

    #[tokio::test]
    async fn test_progress_mapped_onto_slice() {
        let (res, events) = with_events(|ev| async move {
            stream_command_with_progress(&mut sh(r"printf '50%%\n'"), 6, &ev, 0.5, 0.5).await
        })
        .await;
        res.unwrap();
        let progress: Vec<f64> = events
            .iter()
            .filter(|e| e.kind == EventKind::Progress)
            .map(|e| e.progress)
            .collect();
        assert_eq!(progress, vec![0.75]);
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (events, mut rx) = EventSender::channel(cancel_rx);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let start = std::time::Instant::now();
        let runner = tokio::spawn(async move {
            stream_command(&mut sh("sleep 30"), 1, &events, false).await
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();

        let res = runner.await.unwrap();
        assert!(matches!(res.unwrap_err(), SyncError::Cancelled));
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
        drain.await.unwrap();
    }

    #[tokio::test]
    async fn test_stdin_pump_meters_whole_percents() {
        let payload = vec![b'x'; 1000];
        let total = payload.len() as u64;
        let (res, events) = with_events(|ev| async move {
            let mut cmd = sh("cat >/dev/null");
            cmd.stdout(Stdio::null());
            stream_command_with_stdin(
                &mut cmd,
                4,
                &ev,
                Box::new(std::io::Cursor::new(payload)),
                Path::new("/tmp/test.sql"),
                total,
            )
            .await
        })
        .await;
        res.unwrap();

        let progress: Vec<f64> = events
            .iter()
            .filter(|e| e.kind == EventKind::Progress)
            .map(|e| e.progress)
            .collect();
        assert_eq!(progress.last(), Some(&1.0));
        assert!(progress.windows(2).all(|w| w[0] < w[1]), "monotonic");
    }

    #[tokio::test]
    async fn test_stdin_read_error_fails_with_path() {
        struct FailingReader;
        impl std::io::Read for FailingReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "corrupt gzip"))
            }
        }

        let (res, _) = with_events(|ev| async move {
            let mut cmd = sh("cat >/dev/null");
            cmd.stdout(Stdio::null());
            stream_command_with_stdin(
                &mut cmd,
                4,
                &ev,
                Box::new(FailingReader),
                Path::new("/tmp/broken.sql.gz"),
                100,
            )
            .await
        })
        .await;
        let err = res.unwrap_err();
        assert!(err.to_string().contains("/tmp/broken.sql.gz"), "{err}");
    }
}
