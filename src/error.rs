// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the sync engine.
//!
//! Errors are categorized by their source (configuration, external tools,
//! the filesystem) and include context to help with debugging. There is no
//! retry policy: a failed phase aborts the run and rerunning starts over
//! from phase 1.
//!
//! # Error Categories
//!
//! | Error Type | Raised by | Description |
//! |------------|-----------|-------------|
//! | `Config` | loader | Profile file missing, unreadable, or malformed |
//! | `ToolLaunch` | exec | Binary not found / fork failure |
//! | `ToolExit` | exec | Subprocess exited non-zero |
//! | `Io` | any stage | Read/write failure, tagged with the path involved |
//! | `InvalidPattern` | rewriter | Malformed regular expression in regex mode |
//! | `Hook` | hook stage | A hook script failed, tagged with the script name |
//! | `Cancelled` | any stage | External cancellation was observed |

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur during a sync run.
///
/// Each variant carries enough context to be shown to the operator as-is;
/// the engine forwards `to_string()` output in phase-fail events.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid or missing configuration.
    ///
    /// Raised before phase 1; the run never starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subprocess could not be started at all.
    #[error("cannot launch {command}: {source}")]
    ToolLaunch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A subprocess ran but exited non-zero.
    ///
    /// `detail` holds the tail of the subprocess's stderr, when any was
    /// captured, so the operator sees the tool's own diagnostic.
    #[error("{command} exited with {status}{detail}")]
    ToolExit {
        command: String,
        status: String,
        detail: String,
    },

    /// Filesystem error, tagged with the path that failed.
    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed regular expression in regex replace mode.
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// A hook script failed; the script file name is preserved.
    #[error("hook {script} failed: {source}")]
    Hook {
        script: String,
        #[source]
        source: Box<SyncError>,
    },

    /// The run was cancelled externally.
    #[error("cancelled")]
    Cancelled,

    /// A run finished with a failed phase; the message is the phase's
    /// error text, surfaced by the headless observer as the exit reason.
    #[error("sync failed: {0}")]
    RunFailed(String),

    /// Unexpected internal error. Indicates a bug that needs
    /// investigation, not an operator mistake.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Tag an I/O error with the path and operation it came from.
    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Launch failure for a named command.
    pub fn launch(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::ToolLaunch {
            command: command.into(),
            source,
        }
    }

    /// Non-zero exit for a named command, with an optional stderr tail.
    pub fn exit(command: impl Into<String>, status: impl Into<String>, tail: &[String]) -> Self {
        let detail = if tail.is_empty() {
            String::new()
        } else {
            format!("\n{}", tail.join("\n"))
        };
        Self::ToolExit {
            command: command.into(),
            status: status.into(),
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_carries_path() {
        let err = SyncError::io(
            "open",
            "/tmp/dump.sql",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/dump.sql"));
        assert!(msg.contains("open"));
    }

    #[test]
    fn test_exit_error_includes_stderr_tail() {
        let tail = vec!["ERROR 1045 (28000): Access denied".to_string()];
        let err = SyncError::exit("mysql", "exit status: 1", &tail);
        let msg = err.to_string();
        assert!(msg.contains("mysql"));
        assert!(msg.contains("Access denied"));
    }

    #[test]
    fn test_exit_error_without_tail() {
        let err = SyncError::exit("rsync", "exit status: 23", &[]);
        assert_eq!(err.to_string(), "rsync exited with exit status: 23");
    }

    #[test]
    fn test_invalid_pattern_from_regex_error() {
        let err: SyncError = regex::Regex::new("[invalid").unwrap_err().into();
        assert!(err.to_string().contains("invalid pattern"));
    }

    #[test]
    fn test_hook_error_names_script() {
        let inner = SyncError::exit("bash", "exit status: 2", &[]);
        let err = SyncError::Hook {
            script: "10-flush-cache.sh".to_string(),
            source: Box::new(inner),
        };
        assert!(err.to_string().contains("10-flush-cache.sh"));
    }

    #[test]
    fn test_cancelled_display() {
        assert_eq!(SyncError::Cancelled.to_string(), "cancelled");
    }
}
