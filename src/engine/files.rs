// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! File mirror phase: transfer each sync pair via rsync or lftp.
//!
//! rsync runs over the remote shell and reports in-place progress lines,
//! which are parsed into progress events; each pair's local 0–100% is
//! mapped onto its slice of the phase's global progress. lftp emits its
//! own per-line progress, so its output is streamed as plain logs.
//!
//! Both source and destination paths are normalized to end in a slash so
//! the tool copies directory *contents*, not the directory itself
//! (`.../public` → `.../public/`).

use super::RunContext;
use crate::config::{Config, SyncPair, TransportType};
use crate::error::Result;
use crate::events::EventSender;
use crate::exec;
use tokio::process::Command;

/// Phase 6: transfer files for every configured sync pair, in order.
pub async fn sync_files(ctx: &RunContext, events: &EventSender, phase: u8) -> Result<()> {
    if ctx.cfg.sync.is_empty() {
        events
            .log(phase, "No sync pairs configured, skipping file sync")
            .await?;
        return Ok(());
    }

    match ctx.cfg.transport.kind {
        TransportType::Lftp => sync_lftp(ctx, events, phase).await,
        TransportType::Rsync => sync_rsync(ctx, events, phase).await,
    }
}

async fn sync_rsync(ctx: &RunContext, events: &EventSender, phase: u8) -> Result<()> {
    let cfg = &ctx.cfg;
    let bin = if cfg.destination.path_to_rsync.is_empty() {
        "rsync"
    } else {
        cfg.destination.path_to_rsync.as_str()
    };

    let total = cfg.sync.len();
    for (idx, pair) in cfg.sync.iter().enumerate() {
        let args = build_rsync_args(cfg, pair);
        events
            .log(phase, format!("  $ {} {}", bin, args.join(" ")))
            .await?;

        let mut cmd = Command::new(bin);
        cmd.args(&args);
        let base = idx as f64 / total as f64;
        let slice = 1.0 / total as f64;
        exec::stream_command_with_progress(&mut cmd, phase, events, base, slice).await?;
    }
    Ok(())
}

fn build_rsync_args(cfg: &Config, pair: &SyncPair) -> Vec<String> {
    let t = &cfg.transport;
    let src = &cfg.source;

    let opts = if t.rsync_options.is_empty() {
        "-uvrpztl"
    } else {
        t.rsync_options.as_str()
    };
    let mut args: Vec<String> = opts.split_whitespace().map(String::from).collect();

    // Remote shell with the source's port.
    args.push("-e".to_string());
    args.push(format!("ssh -p {}", src.port));

    args.push("--info=progress2".to_string());

    for ex in &t.exclude {
        args.push("--exclude".to_string());
        args.push(ex.clone());
    }

    let src_path = ensure_trailing_slash(&pair.src);
    let dst_path = ensure_trailing_slash(&pair.dst);
    args.push(format!("{}@{}:{}", src.user, src.server, src_path));
    args.push(dst_path);

    args
}

async fn sync_lftp(ctx: &RunContext, events: &EventSender, phase: u8) -> Result<()> {
    let cfg = &ctx.cfg;
    let bin = if cfg.destination.path_to_lftp.is_empty() {
        "lftp"
    } else {
        cfg.destination.path_to_lftp.as_str()
    };

    for pair in &cfg.sync {
        let (script, log_script) = build_lftp_script(cfg, pair);
        events.log(phase, format!("  $ {bin} -c '...'")).await?;
        events.log(phase, format!("  {log_script}")).await?;

        let mut cmd = Command::new(bin);
        cmd.arg("-c").arg(&script);
        exec::stream_command(&mut cmd, phase, events, false).await?;
    }
    Ok(())
}

/// Returns `(script, log_script)` where `log_script` carries the
/// password-free URL and is the only variant that may be emitted.
fn build_lftp_script(cfg: &Config, pair: &SyncPair) -> (String, String) {
    let src = &cfg.source;
    let t = &cfg.transport;
    let lf = &t.lftp;

    let mut mirror_opts = if lf.mirror_options.is_empty() {
        "--parallel=16 --verbose --only-newer".to_string()
    } else {
        lf.mirror_options.clone()
    };
    for ex in &t.exclude {
        mirror_opts.push_str(&format!(" --exclude {ex}"));
    }

    let port = if lf.port == 0 { 21 } else { lf.port };

    let prefix = if lf.connect_options.is_empty() {
        String::new()
    } else {
        format!("{}; ", lf.connect_options)
    };

    let protocol = src.site_protocol.trim_end_matches("://");
    let protocol = if protocol.is_empty() { "ftp" } else { protocol };

    let src_path = ensure_trailing_slash(&pair.src);
    let dst_path = ensure_trailing_slash(&pair.dst);

    let base_url = format!("{}://{}@{}:{}{}", protocol, src.user, src.server, port, src_path);
    let url = if lf.password.is_empty() {
        base_url.clone()
    } else {
        format!(
            "{}://{}:{}@{}:{}{}",
            protocol, src.user, lf.password, src.server, port, src_path
        )
    };

    let script = format!("{prefix}open {url}; mirror {mirror_opts} . {dst_path}");
    let log_script = format!("{prefix}open {base_url}; mirror {mirror_opts} . {dst_path}");
    (script, log_script)
}

/// Appends a `/` if the path doesn't already end with one.
fn ensure_trailing_slash(path: &str) -> String {
    if !path.is_empty() && !path.ends_with('/') {
        format!("{path}/")
    } else {
        path.to_string()
    }
}
