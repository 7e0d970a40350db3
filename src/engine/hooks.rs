// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hook phases: user-supplied shell scripts run between pipeline phases.
//!
//! Hooks live in `<hook-root>/{before,between,after}/*.sh`, execute in
//! lexicographic order with the profile directory as working directory,
//! and receive the full profile as environment variables. The variable
//! names match the historical shell tool exactly so existing hook
//! scripts keep working unmodified.

use super::RunContext;
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::events::EventSender;
use crate::exec;
use std::path::Path;
use tokio::process::Command;

/// Run all `*.sh` scripts for one hook phase directory (`before`,
/// `between`, `after`). A missing directory or zero scripts is success.
pub async fn run_hooks(
    ctx: &RunContext,
    phase_dir: &str,
    events: &EventSender,
    phase: u8,
) -> Result<()> {
    let dir = ctx.cfg.hook_dir(phase_dir);
    let mut scripts: Vec<_> = match std::fs::read_dir(&dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "sh"))
            .collect(),
        Err(_) => return Ok(()), // no hooks is fine
    };
    scripts.sort();

    for script in scripts {
        let name = script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        events.log(phase, format!("  running hook: {name}")).await?;

        let mut cmd = Command::new("bash");
        cmd.arg(&script)
            .envs(hook_env(&ctx.cfg, &ctx.dump_path))
            .current_dir(ctx.cfg.profile_dir());

        if let Err(e) = exec::stream_command(&mut cmd, phase, events, false).await {
            if matches!(e, SyncError::Cancelled) {
                return Err(e);
            }
            return Err(SyncError::Hook {
                script: name,
                source: Box::new(e),
            });
        }
    }
    Ok(())
}

/// The environment passed to hook scripts, in addition to the parent's.
///
/// `dst_path_to_resilient_replace` points back at this executable's
/// `replace` subcommand so hooks can rewrite files with correct
/// serialized byte counts. `dst_path_to_php` historically named an
/// interpreter; it points at `echo` so old scripts referencing it do not
/// hard-fail.
pub fn hook_env(cfg: &Config, sql_file: &Path) -> Vec<(String, String)> {
    let src = &cfg.source;
    let dst = &cfg.destination;

    let self_bin = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "sitesync".to_string());

    let var = |k: &str, v: &str| (k.to_string(), v.to_string());
    vec![
        var("sqlfile", &sql_file.display().to_string()),
        // Source
        var("src_server", &src.server),
        var("src_user", &src.user),
        var("src_port", &src.port.to_string()),
        var("src_site_host", &src.site_host),
        var("src_site_protocol", &src.site_protocol),
        var("src_site_slug", &src.site_slug),
        var("src_files_root", &src.files_root),
        var("src_dbname", &src.db_name),
        var("src_dbuser", &src.db_user),
        var("src_dbhostname", &src.db_hostname),
        var("src_dbpass", &src.db_password),
        var("src_type", &src.kind.to_string()),
        // Destination
        var("dst_site_host", &dst.site_host),
        var("dst_site_protocol", &dst.site_protocol),
        var("dst_site_slug", &dst.site_slug),
        var("dst_files_root", &dst.files_root),
        var("dst_dbname", &dst.db_name),
        var("dst_dbuser", &dst.db_user),
        var("dst_dbhostname", &dst.db_hostname),
        var("dst_dbpass", &dst.db_password),
        var("dst_path_to_mysql", &dst.path_to_mysql),
        var("dst_path_to_rsync", &dst.path_to_rsync),
        var("dst_path_to_mysqldump", &dst.path_to_mysqldump),
        var("dst_path_to_lftp", &dst.path_to_lftp),
        var("dst_path_to_resilient_replace", &format!("{self_bin} replace")),
        var("dst_path_to_php", "echo"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn env_map(cfg: &Config) -> HashMap<String, String> {
        hook_env(cfg, Path::new("/tmp/demo.sql")).into_iter().collect()
    }

    #[test]
    fn test_hook_env_carries_profile_fields() {
        let mut cfg = Config::default();
        cfg.source.server = "example.com".to_string();
        cfg.source.db_password = "srcpass".to_string();
        cfg.destination.db_name = "blog_dev".to_string();

        let env = env_map(&cfg);
        assert_eq!(env["sqlfile"], "/tmp/demo.sql");
        assert_eq!(env["src_server"], "example.com");
        assert_eq!(env["src_port"], "22");
        assert_eq!(env["src_dbpass"], "srcpass");
        assert_eq!(env["src_type"], "remote-dump");
        assert_eq!(env["dst_dbname"], "blog_dev");
        assert_eq!(env["dst_path_to_php"], "echo");
        assert!(env["dst_path_to_resilient_replace"].ends_with(" replace"));
    }

    #[tokio::test]
    async fn test_missing_hook_dir_is_success() {
        let cfg = Config::for_testing("/nonexistent/etc/demo/config.toml");
        let ctx = RunContext {
            cfg: std::sync::Arc::new(cfg),
            dump_path: PathBuf::from("/tmp/demo.sql"),
        };

        let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        let (events, mut rx) = crate::events::EventSender::channel(cancel_rx);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        run_hooks(&ctx, "before", &events, 3).await.unwrap();
        drop(events);
        drain.await.unwrap();
    }
}
