//! mirror-daemon: keep a remote directory in step with its local copy.
//!
//! Polls the local copy, replays creations, modifications and deletions over
//! SSH, and runs `.command` files remotely when they change.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mirror_core::{GuardianConfig, Reconciler, ReconcilerConfig, SessionGuardian};
use mirror_daemon::config::{load_policy, Args};
use mirror_daemon::initial;
use mirror_daemon::native_fs::NativeFs;
use mirror_daemon::pacer::DaemonPacer;
use mirror_daemon::ssh::OpenSshConnector;
use mirror_daemon::watcher::FileWatcher;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(args.log_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mode = args.initial_sync()?;
    let layout = args.layout()?;
    let interval = args.poll_interval()?;
    let policy = load_policy(args.config.as_deref())?;
    let base = std::env::current_dir().context("Failed to read the working directory")?;

    info!("Starting mirror-daemon");
    info!("Local copy: {:?}", base.join(layout.local_root()));
    info!("Remote directory: {}", layout.remote_dir());

    let identity = args.identity()?;
    if identity.secret.is_none() {
        info!("No password given; relying on key-based authentication");
    }

    let guardian = SessionGuardian::new(
        OpenSshConnector::default(),
        GuardianConfig {
            identity,
            keep_alive: args.keep_alive,
        },
    );
    let mut session = guardian.connect().await?;

    if let Err(e) = initial::perform(mode, session.as_mut(), &layout, &base).await {
        session.close().await;
        return Err(e);
    }

    let config = ReconcilerConfig::new(layout.clone(), base.clone()).with_policy(policy.clone());
    let mut reconciler = match Reconciler::with_baseline(NativeFs::new(base.clone()), config).await {
        Ok(reconciler) => reconciler,
        Err(e) => {
            session.close().await;
            return Err(e.into());
        }
    };
    info!(
        "Baseline captured: {} file(s); polling every {:?}",
        reconciler.snapshot().len(),
        interval
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut pacer = DaemonPacer::new(interval, shutdown_rx);
    if args.watch {
        match FileWatcher::new(&base, layout.local_root(), policy) {
            Ok(watcher) => {
                info!("Watching {:?} for early wake-ups", watcher.root());
                pacer = pacer.with_watcher(watcher);
            }
            Err(e) => warn!("File watcher unavailable, polling only: {}", e),
        }
    }

    match guardian.supervise(&mut reconciler, session, &mut pacer).await {
        Ok(summary) => {
            info!(
                "Stopped after {} cycle(s), {} reconnect(s)",
                summary.cycles, summary.reconnects
            );
            Ok(())
        }
        Err(e) => {
            error!("Mirroring stopped: {}", e);
            Err(e.into())
        }
    }
}
