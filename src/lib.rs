//! # sitesync
//!
//! Pulls a remote website, its database and its file tree, into a local
//! development environment as a reproducible, auditable operation.
//!
//! ## Architecture
//!
//! A run executes seven fixed phases in order, streaming progress to a
//! single observer over an event channel:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                                 engine                                   │
//! │                                                                          │
//! │  1 fetch dump ─► 2 rewrite ─► 3 hooks ─► 4 import ─► 5 hooks ─► 6 files  │
//! │       │              │                      │                      │     │
//! │       ▼              ▼                      ▼                      ▼     │
//! │  ┌─────────┐   ┌──────────┐           ┌─────────┐       ┌────────────┐   │
//! │  │  exec   │   │ replace  │           │  exec   │       │    exec    │   │
//! │  │ ssh/scp │   │ s:N:"…"; │           │  mysql  │       │ rsync/lftp │   │
//! │  └─────────┘   └──────────┘           └─────────┘       └────────────┘   │
//! │                                                              ─► 7 hooks  │
//! │                                                                          │
//! │                 events ───────────────► observer (headless printer)      │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The rewriter ([`replace`]) is serialization-aware: find/replace inside
//! byte-counted `s:N:"…";` string literals keeps the byte counts correct,
//! so serialized CMS data survives URL rewrites intact.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sitesync::{Config, Logger, Op};
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> sitesync::Result<()> {
//!     let cfg = Arc::new(Config::load("mysite")?);
//!     let (_cancel_tx, cancel_rx) = watch::channel(false);
//!     sitesync::engine::run_headless(cfg, Op::All, Logger::discard(), cancel_rx).await
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod exec;
pub mod logger;
pub mod replace;

// Re-exports for convenience
pub use config::{Config, ProfileEntry, SourceType, TransportType};
pub use error::{Result, SyncError};
pub use events::{phase_name, Event, EventKind, EventSender, Op};
pub use logger::Logger;
pub use replace::{replace_file, ReplaceOptions, Replacer};
