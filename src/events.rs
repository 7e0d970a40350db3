// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed messages from the sync engine to its observer.
//!
//! A single consumer drains the channel; producers (the engine and the
//! per-subprocess scanner tasks) share clones of [`EventSender`]. The
//! channel is bounded so a slow consumer applies back-pressure instead of
//! losing events; once cancellation fires, producers stop blocking on
//! emit and abort with [`SyncError::Cancelled`].
//!
//! Ordering is FIFO per producer. Across phases, all events of phase `N`
//! precede any event of phase `N + 1` because the engine barriers on
//! scanner completion before moving on.

use crate::error::{Result, SyncError};
use tokio::sync::{mpsc, watch};

/// Channel capacity: enough to absorb a burst of subprocess log lines
/// without stalling the pipeline on a momentarily busy consumer.
pub const CHANNEL_CAPACITY: usize = 64;

/// What kind of engine event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A phase has begun.
    PhaseStart,
    /// A phase completed successfully.
    PhaseDone,
    /// A phase failed; `message` contains the error. The engine halts.
    PhaseFail,
    /// A single line of output, usually from a subprocess.
    Log,
    /// A progress update (`progress` is 0.0–1.0).
    Progress,
    /// The entire run has finished.
    Done,
}

/// The message type passed from the sync engine to the observer.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    /// 1–7 for phase events, 0 for run-level events.
    pub phase: u8,
    /// Log text for `Log`; error text for `PhaseFail`.
    pub message: String,
    /// 0.0–1.0 for `Progress`.
    pub progress: f64,
}

impl Event {
    pub fn phase_start(phase: u8) -> Self {
        Self {
            kind: EventKind::PhaseStart,
            phase,
            message: String::new(),
            progress: 0.0,
        }
    }

    pub fn phase_done(phase: u8) -> Self {
        Self {
            kind: EventKind::PhaseDone,
            phase,
            message: String::new(),
            progress: 0.0,
        }
    }

    pub fn phase_fail(phase: u8, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::PhaseFail,
            phase,
            message: message.into(),
            progress: 0.0,
        }
    }

    pub fn log(phase: u8, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Log,
            phase,
            message: message.into(),
            progress: 0.0,
        }
    }

    pub fn progress(phase: u8, progress: f64) -> Self {
        Self {
            kind: EventKind::Progress,
            phase,
            message: String::new(),
            progress,
        }
    }

    pub fn done() -> Self {
        Self {
            kind: EventKind::Done,
            phase: 0,
            message: String::new(),
            progress: 0.0,
        }
    }
}

/// Which parts of the sync to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Op {
    /// SQL + files (all seven phases).
    #[default]
    All,
    /// Database only: phases 6 and 7 are skipped.
    Sql,
    /// Files only: phases 1–5 are skipped.
    Files,
}

impl Op {
    /// Whether the given phase (1–7) actually executes under this
    /// operation. Skipped phases still emit start/done events so the
    /// observer can render a consistent 7-row display.
    pub fn runs_phase(self, phase: u8) -> bool {
        match self {
            Op::All => true,
            Op::Sql => phase <= 5,
            Op::Files => phase >= 6,
        }
    }

    /// Whether any SQL phase (1–5) runs.
    pub fn runs_sql(self) -> bool {
        self != Op::Files
    }

    /// Whether the file phases (6–7) run.
    pub fn runs_files(self) -> bool {
        self != Op::Sql
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::All => write!(f, "all"),
            Op::Sql => write!(f, "sql"),
            Op::Files => write!(f, "files"),
        }
    }
}

/// Human-readable name for each phase (1-indexed).
pub fn phase_name(phase: u8) -> &'static str {
    match phase {
        1 => "Fetch SQL dump",
        2 => "Find / Replace",
        3 => "Before hooks",
        4 => "Import SQL",
        5 => "Between hooks",
        6 => "Sync files",
        7 => "After hooks",
        _ => "Unknown",
    }
}

/// Cancellation-aware event producer handle.
///
/// Wraps the event channel together with the run's cancellation signal so
/// every emit observes cancellation. Cloned freely into scanner tasks;
/// the channel closes when the last clone is dropped.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
    cancel: watch::Receiver<bool>,
}

impl EventSender {
    /// Create a bounded event channel plus its producer handle.
    pub fn channel(cancel: watch::Receiver<bool>) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (Self { tx, cancel }, rx)
    }

    /// Send one event, aborting if cancellation fires while blocked on a
    /// full channel. A dropped consumer is treated as cancellation: with
    /// nobody observing, the run has no reason to continue.
    pub async fn send(&self, event: Event) -> Result<()> {
        let mut cancel = self.cancel.clone();
        tokio::select! {
            res = self.tx.send(event) => res.map_err(|_| SyncError::Cancelled),
            _ = wait_cancelled(&mut cancel) => Err(SyncError::Cancelled),
        }
    }

    /// Convenience: send a log line for a phase.
    pub async fn log(&self, phase: u8, message: impl Into<String>) -> Result<()> {
        self.send(Event::log(phase, message)).await
    }

    /// Convenience: send a progress value for a phase.
    pub async fn progress(&self, phase: u8, progress: f64) -> Result<()> {
        self.send(Event::progress(phase, progress)).await
    }

    /// Whether cancellation has been signalled.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolve once cancellation is signalled; never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        wait_cancelled(&mut cancel).await;
    }
}

async fn wait_cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        // A dropped sender means cancellation can never fire.
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
