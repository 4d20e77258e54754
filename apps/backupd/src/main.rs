use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use backup_core::{Orchestrator, PassOutcome, Trigger};
use backup_ipc::socket;
use backup_utils::{ensure_private_dir, runtime_paths};

use crate::config::Config;
use crate::service::BackupHost;

mod config;
mod daemon;
mod lock;
mod service;

#[derive(Parser)]
#[command(name = "backupd", version, about = "Periodic directory backups to Google Drive")]
struct Args {
    /// Defaults to <config dir>/drive-backup/backupd.toml.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run a single backup pass in the foreground and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;
    init_tracing(&config.log_filter);

    if args.once {
        return run_once(&config).await;
    }

    let paths = runtime_paths();
    ensure_private_dir(&paths.runtime_dir)
        .with_context(|| format!("failed to create {}", paths.runtime_dir.display()))?;

    // single-instance lock
    let Some(_lock) = lock::try_acquire(&paths.lock_path)? else {
        warn!("daemon already running (lock held), exiting");
        return Ok(());
    };

    if paths.socket_path.exists() {
        if socket::socket_alive(&paths.socket_path).await {
            warn!("daemon already running (socket alive), exiting");
            return Ok(());
        }
        socket::remove_stale_socket(&paths.socket_path)?;
    }

    let listener = socket::bind(&paths.socket_path)
        .await
        .with_context(|| format!("failed to bind {}", paths.socket_path.display()))?;
    info!(socket = %paths.socket_path.display(), "backupd listening");

    let host = Arc::new(BackupHost::start(&config).await);
    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let served = daemon::serve(listener, Arc::clone(&host), shutdown.clone()).await;
    shutdown.cancel();
    host.stop().await;

    if let Err(err) = socket::remove_stale_socket(&paths.socket_path) {
        warn!(error = %err, "failed to remove control socket");
    }
    info!("backupd stopped");
    served.context("control socket failed")
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_once(config: &Config) -> anyhow::Result<()> {
    let store = service::authorize(config).await?;
    let orchestrator = Orchestrator::new(config.plan(), store);

    let PassOutcome::Completed(report) = orchestrator.run_now(Trigger::Manual).await else {
        bail!("a backup pass is already running");
    };
    if let Some(reason) = &report.aborted {
        bail!("backup pass aborted: {reason}");
    }
    let failed = report.failed().count();
    if failed > 0 {
        bail!("backup pass finished with {failed} failed source(s)");
    }
    Ok(())
}

async fn watch_signals(shutdown: CancellationToken) {
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received; shutting down"),
        _ = terminate => info!("terminate received; shutting down"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}
