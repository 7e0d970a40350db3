// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Database phases: acquiring the SQL dump (phase 1) and importing it
//! into the local database (phase 4).
//!
//! Phase 1 branches on the profile's source type: copy an existing file
//! (locally or over the remote shell), or run the dump binary (locally or
//! remotely) with stdout captured into the dump artifact.
//!
//! Phase 4 feeds the artifact into the local import binary's stdin,
//! transparently decompressing gzip (detected from the file name) and
//! stripping MariaDB-specific `/*M!` conditional comments that the other
//! engine rejects as a syntax error.

use super::{human_size, RunContext};
use crate::config::{Config, SourceType};
use crate::error::{Result, SyncError};
use crate::events::EventSender;
use crate::exec::{self, redact_args};
use regex::bytes::Regex;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use tokio::process::Command;

/// Phase 1: fetch the remote or local SQL dump into the artifact path.
pub async fn fetch_dump(ctx: &RunContext, events: &EventSender) -> Result<()> {
    let cfg = &ctx.cfg;
    let src = &cfg.source;
    let dump = &ctx.dump_path;

    match src.kind {
        SourceType::LocalFile => {
            events.log(1, format!("  source: local file {}", src.file)).await?;
            std::fs::copy(&src.file, dump)
                .map_err(|e| SyncError::io("copy", &src.file, e))?;
        }
        SourceType::RemoteFile => {
            events
                .log(1, format!("  source: {}@{}:{}", src.user, src.server, src.file))
                .await?;
            events.log(1, format!("  port: {}", src.port)).await?;
            scp_fetch(ctx, events).await?;
        }
        SourceType::LocalDump => {
            events
                .log(1, format!("  source: local mysqldump → {}", src.db_name))
                .await?;
            dump_local_db(ctx, events).await?;
        }
        SourceType::RemoteDump => {
            events
                .log(1, format!("  source: {}@{} → {}", src.user, src.server, src.db_name))
                .await?;
            events
                .log(1, format!("  host: {}  port: {}", src.server, src.port))
                .await?;
            dump_remote_db(ctx, events).await?;
        }
    }

    if let Ok(meta) = std::fs::metadata(dump) {
        let name = dump.file_name().map(|n| n.to_string_lossy().into_owned());
        events
            .log(
                1,
                format!(
                    "  dump: {} ({})",
                    name.unwrap_or_default(),
                    human_size(meta.len())
                ),
            )
            .await?;
    }
    Ok(())
}

/// Phase 4: import the SQL dump into the local database.
pub async fn import_dump(ctx: &RunContext, events: &EventSender, phase: u8) -> Result<()> {
    let cfg = &ctx.cfg;
    let dst = &cfg.destination;
    let dump = &ctx.dump_path;

    events
        .log(
            phase,
            format!("  target: {}@{} → {}", dst.db_user, dst.db_hostname, dst.db_name),
        )
        .await?;

    let file = std::fs::File::open(dump).map_err(|e| SyncError::io("open dump file", dump, e))?;
    let total = file
        .metadata()
        .map_err(|e| SyncError::io("stat dump file", dump, e))?
        .len();
    events.log(phase, format!("  dump size: {}", human_size(total))).await?;

    // Decompress with the stdlib-free gzip crate; no external gunzip needed.
    let mut reader: Box<dyn Read + Send> =
        if dump.extension().is_some_and(|e| e.eq_ignore_ascii_case("gz")) {
            Box::new(flate2::read::MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };

    // Strip MariaDB-specific comments that break the import, but only
    // when the dump actually contains them.
    let stripped = Arc::new(AtomicUsize::new(0));
    if is_mariadb_dump(dump) {
        events
            .log(phase, "  detected MariaDB dump, stripping M! comments")
            .await?;
        reader = Box::new(MariaDbStripper::new(reader, Arc::clone(&stripped)));
    }

    let args = build_mysql_args(cfg);
    let bin = mysql_bin(cfg);
    events.log(phase, format!("  $ {} {}", bin, redact_args(&args))).await?;

    let mut cmd = Command::new(bin);
    cmd.args(&args).stdout(Stdio::null());
    exec::stream_command_with_stdin(&mut cmd, phase, events, reader, dump, total).await?;

    let count = stripped.load(Ordering::Relaxed);
    if count > 0 {
        events
            .log(phase, format!("  stripped {count} MariaDB-specific comment line(s)"))
            .await?;
    }
    Ok(())
}

async fn scp_fetch(ctx: &RunContext, events: &EventSender) -> Result<()> {
    let src = &ctx.cfg.source;
    let port = src.port.to_string();
    let remote = format!("{}@{}:{}", src.user, src.server, src.file);
    let dump = ctx.dump_path.display().to_string();

    events
        .log(1, format!("  $ scp -P {port} {remote} {dump}"))
        .await?;
    let mut cmd = Command::new("scp");
    cmd.args(["-P", &port, &remote, &dump]);
    exec::stream_command(&mut cmd, 1, events, false).await
}

async fn dump_local_db(ctx: &RunContext, events: &EventSender) -> Result<()> {
    let cfg = &ctx.cfg;
    let args = build_dump_args(cfg);
    let bin = if cfg.destination.path_to_mysqldump.is_empty() {
        "mysqldump"
    } else {
        cfg.destination.path_to_mysqldump.as_str()
    };
    events.log(1, format!("  $ {} {}", bin, redact_args(&args))).await?;

    let out = std::fs::File::create(&ctx.dump_path)
        .map_err(|e| SyncError::io("create dump file", &ctx.dump_path, e))?;
    let mut cmd = Command::new(bin);
    cmd.args(&args).stdout(Stdio::from(out));
    exec::stream_command(&mut cmd, 1, events, true).await
}

async fn dump_remote_db(ctx: &RunContext, events: &EventSender) -> Result<()> {
    let cfg = &ctx.cfg;
    let src = &cfg.source;

    // Compose the dump command to run remotely over the remote shell.
    let dump_bin = if src.path_to_mysqldump.is_empty() {
        "mysqldump"
    } else {
        src.path_to_mysqldump.as_str()
    };
    let mut remote_parts: Vec<String> = Vec::new();
    if !src.remote_nice.is_empty() {
        remote_parts.extend(src.remote_nice.split_whitespace().map(String::from));
    }
    remote_parts.push(dump_bin.to_string());
    remote_parts.extend(build_dump_args(cfg));

    let port = src.port.to_string();
    let target = format!("{}@{}", src.user, src.server);
    let remote_cmd = remote_parts.join(" ");

    events
        .log(
            1,
            format!("  $ ssh -p {} {} {}", port, target, redact_args(&remote_parts)),
        )
        .await?;

    let out = std::fs::File::create(&ctx.dump_path)
        .map_err(|e| SyncError::io("create dump file", &ctx.dump_path, e))?;
    let mut cmd = Command::new("ssh");
    cmd.args(["-p", &port, &target, &remote_cmd])
        .stdout(Stdio::from(out));
    exec::stream_command(&mut cmd, 1, events, true).await
}

/// Deterministic dump-argument assembly: structure options, extra
/// options, host, optional port, optional user, optional password
/// (attached form), one ignore flag per excluded table, database last.
fn build_dump_args(cfg: &Config) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let db = &cfg.database;
    let src = &cfg.source;

    args.extend(db.sql_options_structure.split_whitespace().map(String::from));
    args.extend(db.sql_options_extra.split_whitespace().map(String::from));

    args.push("-h".to_string());
    args.push(src.db_hostname.clone());
    if !src.db_port.is_empty() {
        args.push("-P".to_string());
        args.push(src.db_port.clone());
    }
    if !src.db_user.is_empty() {
        args.push("-u".to_string());
        args.push(src.db_user.clone());
    }
    if !src.db_password.is_empty() {
        args.push(format!("-p{}", src.db_password));
    }
    for tbl in &db.ignore_tables {
        args.push(format!("--ignore-table={}.{}", src.db_name, tbl));
    }
    if !src.db_name.is_empty() {
        args.push(src.db_name.clone());
    }
    args
}

fn build_mysql_args(cfg: &Config) -> Vec<String> {
    let dst = &cfg.destination;
    let mut args: Vec<String> = Vec::new();
    args.push("-h".to_string());
    args.push(dst.db_hostname.clone());
    if !dst.db_port.is_empty() {
        args.push("-P".to_string());
        args.push(dst.db_port.clone());
    }
    if !dst.db_user.is_empty() {
        args.push("-u".to_string());
        args.push(dst.db_user.clone());
    }
    if !dst.db_password.is_empty() {
        args.push(format!("-p{}", dst.db_password));
    }
    args.push(dst.db_name.clone());
    args
}

fn mysql_bin(cfg: &Config) -> &str {
    if cfg.destination.path_to_mysql.is_empty() {
        "mysql"
    } else {
        cfg.destination.path_to_mysql.as_str()
    }
}

// ── MariaDB comment stripper ────────────────────────────────────────────

/// Matches MariaDB-specific comments that the import rejects, e.g.
/// `/*M!999999\- enable the sandbox mode */`.
static MARIADB_INLINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)/\*M!.*?\*/").unwrap());

/// Matches a line that is nothing but a MariaDB comment (the common case).
static MARIADB_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)^\s*/\*M!.*?\*/\s*;?\s*$").unwrap());

/// Quick check on the first few KiB of the artifact for `/*M!` comments
/// that need stripping.
fn is_mariadb_dump(path: &Path) -> bool {
    let Ok(mut f) = std::fs::File::open(path) else {
        return false;
    };
    let mut buf = [0u8; 8192];
    let n = f.read(&mut buf).unwrap_or(0);
    buf[..n].windows(4).any(|w| w == b"/*M!")
}

/// Reader adapter that drops full-line MariaDB comments and removes
/// inline occurrences, line by line, counting what it stripped.
struct MariaDbStripper<R: Read> {
    inner: BufReader<R>,
    pending: Vec<u8>,
    pos: usize,
    stripped: Arc<AtomicUsize>,
    eof: bool,
}

impl<R: Read> MariaDbStripper<R> {
    fn new(inner: R, stripped: Arc<AtomicUsize>) -> Self {
        Self {
            inner: BufReader::with_capacity(64 * 1024, inner),
            pending: Vec::new(),
            pos: 0,
            stripped,
            eof: false,
        }
    }

    fn refill(&mut self) -> std::io::Result<()> {
        let mut raw: Vec<u8> = Vec::new();
        loop {
            raw.clear();
            let n = self.inner.read_until(b'\n', &mut raw)?;
            if n == 0 {
                self.eof = true;
                return Ok(());
            }
            if raw.last() == Some(&b'\n') {
                raw.pop();
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
            }

            if MARIADB_LINE_RE.is_match(&raw) {
                self.stripped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let cleaned = MARIADB_INLINE_RE.replace_all(&raw, &b""[..]);
            self.pending.clear();
            self.pending.extend_from_slice(&cleaned);
            self.pending.push(b'\n');
            self.pos = 0;
            return Ok(());
        }
    }
}

impl<R: Read> Read for MariaDbStripper<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if self.pos < self.pending.len() {
                let n = (self.pending.len() - self.pos).min(buf.len());
                buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.eof {
                return Ok(0);
            }
            self.refill()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config_with(src_pass: &str, dst_pass: &str) -> Config {
        let mut cfg = Config::default();
        cfg.source.db_hostname = "db.example.com".to_string();
        cfg.source.db_user = "reader".to_string();
        cfg.source.db_password = src_pass.to_string();
        cfg.source.db_name = "blog".to_string();
        cfg.destination.db_user = "writer".to_string();
        cfg.destination.db_password = dst_pass.to_string();
        cfg.destination.db_name = "blog_dev".to_string();
        cfg
    }

    #[test]
    fn test_dump_args_deterministic_order() {
        let mut cfg = config_with("s3cret", "");
        cfg.database.sql_options_extra = "--single-transaction --quick".to_string();
        cfg.database.ignore_tables = vec!["wp_cache".to_string(), "wp_sessions".to_string()];
        cfg.source.db_port = "3307".to_string();

        let args = build_dump_args(&cfg);
        assert_eq!(
            args,
            vec![
                "--default-character-set=utf8",
                "--single-transaction",
                "--quick",
                "-h",
                "db.example.com",
                "-P",
                "3307",
                "-u",
                "reader",
                "-ps3cret",
                "--ignore-table=blog.wp_cache",
                "--ignore-table=blog.wp_sessions",
                "blog",
            ]
        );
    }

    #[test]
    fn test_dump_args_omit_empty_fields() {
        let mut cfg = Config::default();
        cfg.source.db_name = "blog".to_string();
        let args = build_dump_args(&cfg);
        assert_eq!(args, vec!["--default-character-set=utf8", "-h", "localhost", "blog"]);
    }

    #[test]
    fn test_mysql_args_and_redaction() {
        let cfg = config_with("", "hunter2");
        let args = build_mysql_args(&cfg);
        assert_eq!(args, vec!["-h", "localhost", "-u", "writer", "-phunter2", "blog_dev"]);

        let redacted = redact_args(&args);
        assert!(!redacted.contains("hunter2"));
        assert!(redacted.contains("-p[REDACTED]"));
    }

    #[test]
    fn test_mysql_bin_fallback() {
        let mut cfg = Config::default();
        assert_eq!(mysql_bin(&cfg), "mysql");
        cfg.destination.path_to_mysql = "/opt/mysql/bin/mysql".to_string();
        assert_eq!(mysql_bin(&cfg), "/opt/mysql/bin/mysql");
    }

    #[test]
    fn test_is_mariadb_dump_detection() {
        let dir = tempfile::tempdir().unwrap();

        let mariadb = dir.path().join("maria.sql");
        std::fs::write(&mariadb, "/*M!999999\\- enable the sandbox mode */;\nSELECT 1;\n")
            .unwrap();
        assert!(is_mariadb_dump(&mariadb));

        let plain = dir.path().join("plain.sql");
        std::fs::write(&plain, "-- MySQL dump\nSELECT 1;\n").unwrap();
        assert!(!is_mariadb_dump(&plain));

        assert!(!is_mariadb_dump(Path::new("/nonexistent.sql")));
    }

    #[test]
    fn test_stripper_drops_full_line_comments() {
        let input = "/*M!999999\\- enable the sandbox mode */;\nCREATE TABLE t (id INT);\n  /*M!100 x */\nINSERT INTO t VALUES (1);\n";
        let stripped = Arc::new(AtomicUsize::new(0));
        let mut out = String::new();
        MariaDbStripper::new(input.as_bytes(), Arc::clone(&stripped))
            .read_to_string(&mut out)
            .unwrap();

        assert_eq!(out, "CREATE TABLE t (id INT);\nINSERT INTO t VALUES (1);\n");
        assert_eq!(stripped.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_stripper_removes_inline_comments() {
        let input = "SELECT 1 /*M! mariadb only */ FROM dual;\n";
        let stripped = Arc::new(AtomicUsize::new(0));
        let mut out = String::new();
        MariaDbStripper::new(input.as_bytes(), Arc::clone(&stripped))
            .read_to_string(&mut out)
            .unwrap();

        assert_eq!(out, "SELECT 1  FROM dual;\n");
        assert_eq!(stripped.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_stripper_keeps_regular_conditional_comments() {
        let input = "/*!40101 SET NAMES utf8 */;\n";
        let stripped = Arc::new(AtomicUsize::new(0));
        let mut out = String::new();
        MariaDbStripper::new(input.as_bytes(), Arc::clone(&stripped))
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, input);
    }
}
