// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The seven-phase sync engine.
//!
//! The main orchestrator that ties together:
//! - Dump acquisition and import via [`database`]
//! - Serialized-aware rewriting via [`crate::replace`]
//! - Hook execution via [`hooks`]
//! - File mirroring via [`files`]
//!
//! # Phase Plan
//!
//! ```text
//!            init ──► 1 Fetch SQL dump ─► 2 Find / Replace ─► 3 Before hooks
//!                                                                   │
//!            done ◄── 7 After hooks ◄── 6 Sync files ◄── 5 Between hooks
//!                                                                   ▲
//!                                                         4 Import SQL
//! ```
//!
//! Phases run strictly in order; a failed phase emits `PhaseFail` and
//! halts the run (`failed` is reachable from any phase, and there is no
//! retry). Skipped phases (the SQL phases under a files-only run, the
//! file phases under a sql-only run) still emit start/done so observers
//! can render a consistent 7-row display.
//!
//! The engine owns the dump artifact: it is created in phase 1, rewritten
//! in place in phase 2, consumed in phase 4, exposed to hooks via the
//! `sqlfile` environment binding, and deleted after a successful run.

mod database;
mod files;
mod hooks;

use crate::config::{self, Config};
use crate::error::{Result, SyncError};
use crate::events::{phase_name, Event, EventKind, EventSender, Op};
use crate::logger::Logger;
use crate::replace::{self, ReplaceOptions};
use humansize::{format_size, BINARY};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::info;

/// State shared by the stages of one run. The engine constructs it; the
/// stages read it.
pub(crate) struct RunContext {
    pub(crate) cfg: Arc<Config>,
    /// The dump artifact path, stable for the run.
    pub(crate) dump_path: PathBuf,
}

/// Execute the full sync workflow, sending progress events to the
/// observer until the channel closes.
///
/// The run ends with exactly one terminal event: `Done` after a full
/// phase sequence, or `PhaseFail` when a phase errors (including
/// cancellation). Dropping the returned future's `EventSender` closes
/// the channel, which is how observers learn the run is over.
pub async fn run(cfg: Arc<Config>, op: Op, events: EventSender, logger: Logger) {
    let tmp = config::tmp_dir();
    if let Err(e) = std::fs::create_dir_all(&tmp) {
        let _ = events
            .send(Event::phase_fail(1, format!("cannot create tmp dir: {e}")))
            .await;
        return;
    }

    let name = cfg.profile_name();
    let ctx = RunContext {
        dump_path: cfg.dump_file_path(&tmp),
        cfg: Arc::clone(&cfg),
    };

    if preamble(&cfg, op, &name, &events).await.is_err() {
        return;
    }

    logger.log(format!("=== sitesync start: {name} (op={op}) ==="));
    info!(profile = %name, %op, "sync run starting");
    let sync_start = Instant::now();

    for phase in 1..=7u8 {
        if events.is_cancelled() {
            let _ = events.send(Event::phase_fail(phase, "cancelled")).await;
            logger.log(format!("Step {phase} cancelled"));
            return;
        }

        if events.send(Event::phase_start(phase)).await.is_err() {
            return;
        }
        logger.log(format!("Step {phase}/7: {}", phase_name(phase)));

        let start = Instant::now();
        if let Err(e) = run_phase(phase, op, &ctx, &events).await {
            let _ = events.send(Event::phase_fail(phase, e.to_string())).await;
            logger.log(format!("Step {phase} FAILED: {e}"));
            return;
        }
        let elapsed = start.elapsed();

        if events
            .log(phase, format!("  ⏱ {}", format_duration(elapsed)))
            .await
            .is_err()
        {
            return;
        }
        if events.send(Event::phase_done(phase)).await.is_err() {
            return;
        }
        logger.log(format!("Step {phase} done ({})", format_duration(elapsed)));
    }

    let _ = events
        .log(0, format!("\n✔ completed in {}", format_duration(sync_start.elapsed())))
        .await;

    // The artifact is transient; keep the tmp dir clean after success.
    if op.runs_sql() {
        let _ = std::fs::remove_file(&ctx.dump_path);
    }

    logger.log(format!("=== sitesync done: {name} ==="));
    info!(profile = %name, "sync run finished");
    let _ = events.send(Event::done()).await;
}

async fn run_phase(phase: u8, op: Op, ctx: &RunContext, events: &EventSender) -> Result<()> {
    if !op.runs_phase(phase) {
        return Ok(());
    }
    match phase {
        1 => database::fetch_dump(ctx, events).await,
        2 => apply_replacements(ctx, events).await,
        3 => hooks::run_hooks(ctx, "before", events, 3).await,
        4 => database::import_dump(ctx, events, 4).await,
        5 => hooks::run_hooks(ctx, "between", events, 5).await,
        6 => files::sync_files(ctx, events, 6).await,
        7 => hooks::run_hooks(ctx, "after", events, 7).await,
        _ => unreachable!("phase out of range"),
    }
}

/// Display-only summary of what the run is about to do.
async fn preamble(cfg: &Config, op: Op, name: &str, events: &EventSender) -> Result<()> {
    events.log(0, format!("▸ site: {name}")).await?;
    if op.runs_sql() {
        events
            .log(
                0,
                format!(
                    "▸ source: {}@{} ({})",
                    cfg.source.user, cfg.source.server, cfg.source.kind
                ),
            )
            .await?;
        events
            .log(
                0,
                format!("▸ database: {} → {}", cfg.source.db_name, cfg.destination.db_name),
            )
            .await?;
        events
            .log(0, format!("▸ replacements: {} pairs", cfg.replace.len()))
            .await?;
    }
    if op.runs_files() {
        for sp in &cfg.sync {
            events.log(0, format!("▸ files: {} → {}", sp.src, sp.dst)).await?;
        }
        events.log(0, format!("▸ transport: {}", cfg.transport.kind)).await?;
    }
    events.log(0, "").await
}

/// Phase 2: apply every replacement pair, in order, to the dump artifact.
async fn apply_replacements(ctx: &RunContext, events: &EventSender) -> Result<()> {
    if let Ok(meta) = std::fs::metadata(&ctx.dump_path) {
        let name = ctx
            .dump_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        events
            .log(2, format!("  processing {} ({})", name, human_size(meta.len())))
            .await?;
    }

    let total = ctx.cfg.replace.len();
    for (i, pair) in ctx.cfg.replace.iter().enumerate() {
        events
            .log(
                2,
                format!("  [{}/{}] {:?} → {:?}", i + 1, total, pair.search, pair.replace),
            )
            .await?;

        let search = pair.search.clone();
        let replace_with = pair.replace.clone();
        let path = ctx.dump_path.clone();
        tokio::task::spawn_blocking(move || {
            replace::replace_file(&search, &replace_with, &path, ReplaceOptions::default())
        })
        .await
        .map_err(|e| SyncError::Internal(format!("rewrite task failed: {e}")))??;

        events.progress(2, (i + 1) as f64 / total as f64).await?;
    }
    Ok(())
}

/// Run the engine without a UI, printing events to stdout. The process
/// exit status is the caller's: an `Err` here means the run failed.
pub async fn run_headless(
    cfg: Arc<Config>,
    op: Op,
    logger: Logger,
    cancel: watch::Receiver<bool>,
) -> Result<()> {
    use std::io::Write as _;

    let (events, mut rx) = EventSender::channel(cancel);
    let engine = tokio::spawn(run(Arc::clone(&cfg), op, events, logger));

    let mut last_err = String::new();
    while let Some(ev) = rx.recv().await {
        match ev.kind {
            EventKind::PhaseStart => {
                println!("  ◉ [{}/7] {} ...", ev.phase, phase_name(ev.phase));
            }
            EventKind::PhaseDone => {
                println!("  ✔ [{}/7] {} done", ev.phase, phase_name(ev.phase));
            }
            EventKind::PhaseFail => {
                println!("  ✘ [{}/7] {} FAILED: {}", ev.phase, phase_name(ev.phase), ev.message);
                last_err = ev.message;
            }
            EventKind::Progress => {
                print!("\r       {:3.0}%", ev.progress * 100.0);
                let _ = std::io::stdout().flush();
            }
            EventKind::Log => println!("    {}", ev.message),
            EventKind::Done => println!("\n  ✔ sync complete"),
        }
    }

    let _ = engine.await;
    if !last_err.is_empty() {
        return Err(SyncError::RunFailed(last_err));
    }
    Ok(())
}

/// Human-readable duration: `840ms`, `12.3s`, `4m07s`.
pub(crate) fn format_duration(d: Duration) -> String {
    if d < Duration::from_secs(1) {
        format!("{}ms", d.as_millis())
    } else if d < Duration::from_secs(60) {
        format!("{:.1}s", d.as_secs_f64())
    } else {
        let secs = d.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// Human-readable byte size for log lines.
pub(crate) fn human_size(bytes: u64) -> String {
    format_size(bytes, BINARY)
}
