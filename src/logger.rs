//! Run-log file writer.
//!
//! Every run appends timestamped lines to the log file configured under
//! `[logging]`. The handle is cloned into the engine and shared across
//! phases, so appends take a line-granular lock. A discard variant exists
//! for contexts with no log file (tests, dry runs).
//!
//! This is the persistent audit trail; live diagnostics go through
//! `tracing` as elsewhere in the crate.

use crate::error::{Result, SyncError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Shared append-only log handle.
#[derive(Clone)]
pub struct Logger {
    file: Option<Arc<Mutex<File>>>,
}

impl Logger {
    /// Open (or create) the log file at `path`, creating parent
    /// directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| SyncError::io("create log dir", dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SyncError::io("open log file", path, e))?;
        Ok(Self {
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    /// A logger that drops everything. Safe to use concurrently.
    pub fn discard() -> Self {
        Self { file: None }
    }

    /// Append one line with a timestamp prefix. Write failures are
    /// reported via `tracing` rather than aborting the run: losing a log
    /// line must not kill a sync that is otherwise healthy.
    pub fn log(&self, msg: impl AsRef<str>) {
        let Some(file) = &self.file else {
            return;
        };
        let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let line = format!("[{}] {}\n", ts, msg.as_ref());
        let mut f = match file.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = f.write_all(line.as_bytes()) {
            tracing::warn!(error = %e, "run-log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log/sitesync.log");

        let logger = Logger::open(&path).unwrap();
        logger.log("first line");
        logger.log("second line");

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("first line"));
        assert!(lines[1].ends_with("second line"));
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/nested/dir/run.log");
        Logger::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_discard_is_silent() {
        let logger = Logger::discard();
        logger.log("goes nowhere");
    }

    #[test]
    fn test_concurrent_appends_are_line_granular() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let logger = Logger::open(&path).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let logger = logger.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        logger.log(format!("writer {i} line {j}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 8 * 50);
        for line in text.lines() {
            assert!(line.contains("writer"), "torn line: {line:?}");
        }
    }
}
