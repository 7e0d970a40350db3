//! sitesync - sync a remote website to your local environment.
//!
//! Entry point for the CLI application.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sitesync::{config, engine, replace, Config, Logger, Op, ReplaceOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sitesync",
    version,
    about = "Sync a remote website (database + files) to your local environment"
)]
struct Cli {
    /// Profile name (etc/{name}/config.toml)
    #[arg(long, global = true)]
    conf: Option<String>,

    /// Which parts of the sync to run (default: all)
    #[arg(value_enum)]
    op: Option<OpArg>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, ValueEnum)]
enum OpArg {
    /// Database only
    Sql,
    /// Files only
    Files,
}

#[derive(Subcommand)]
enum Command {
    /// Serialize-aware find/replace on a file
    Replace {
        search: String,
        replace: String,
        file: PathBuf,
        /// Treat SEARCH as a regular expression
        #[arg(long)]
        regex: bool,
        /// Only rewrite serialized string values
        #[arg(long)]
        serialized_only: bool,
    },
    /// List the profiles found under etc/
    List,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Command::Replace {
            search,
            replace: replace_with,
            file,
            regex,
            serialized_only,
        }) => {
            let opts = ReplaceOptions {
                regex,
                only_serialized: serialized_only,
            };
            replace::replace_file(&search, &replace_with, &file, opts)
                .with_context(|| format!("replacing in {}", file.display()))?;
            Ok(())
        }
        Some(Command::List) => {
            let profiles = config::list_profiles()?;
            if profiles.is_empty() {
                println!("No profiles found under {}", config::etc_dir().display());
                return Ok(());
            }
            for p in profiles {
                println!("{}\t{}", p.name, p.path.display());
            }
            Ok(())
        }
        None => {
            let op = match cli.op {
                None => Op::All,
                Some(OpArg::Sql) => Op::Sql,
                Some(OpArg::Files) => Op::Files,
            };
            let Some(conf) = cli.conf else {
                bail!("--conf is required (profiles live at etc/{{name}}/config.toml; see `sitesync list`)");
            };
            run_sync(&conf, op)
        }
    }
}

fn run_sync(conf: &str, op: Op) -> Result<()> {
    let cfg = Arc::new(Config::load(conf)?);

    let logger = match Logger::open(&cfg.log_file()) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("warning: cannot open log file: {e}");
            Logger::discard()
        }
    };

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(async move {
        let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

        // First Ctrl-C cancels the run gracefully; the engine kills the
        // active subprocess and reports the phase as failed.
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = cancel_tx.send(true);
            }
        });

        engine::run_headless(cfg, op, logger, cancel_rx).await
    })?;
    Ok(())
}
