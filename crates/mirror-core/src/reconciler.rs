//! Reconciler loop: capture, diff, replay on the remote host, repeat.

use crate::command::{run_command_file, CommandError};
use crate::diff::{compute, DiffPolicy, Event};
use crate::fs::{FileSystem, FsError};
use crate::layout::MirrorLayout;
use crate::snapshot::{capture, Snapshot};
use crate::transport::{Session, TransportError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Default pause between cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum LoopError {
    /// The session died mid-cycle. The snapshot was not advanced.
    #[error("Session lost: {0}")]
    SessionLost(#[source] TransportError),

    #[error("Failed to capture snapshot of {root}: {source}")]
    Capture {
        root: String,
        #[source]
        source: FsError,
    },
}

/// Waits between cycles.
#[async_trait]
pub trait Pacer: Send {
    /// Wait before the next cycle. Returns `false` when the loop should stop.
    async fn pause(&mut self) -> bool;
}

/// Sleeps for a fixed interval, forever.
pub struct IntervalPacer {
    interval: Duration,
}

impl IntervalPacer {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Pacer for IntervalPacer {
    async fn pause(&mut self) -> bool {
        tokio::time::sleep(self.interval).await;
        true
    }
}

/// Static configuration of a reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Local directory being mirrored, relative to the filesystem base.
    pub root: String,
    /// Base directory that local transfer paths are resolved against.
    pub local_base: PathBuf,
    pub layout: MirrorLayout,
    pub policy: DiffPolicy,
}

impl ReconcilerConfig {
    /// Mirror `layout.local_root()` under `local_base` with the default policy.
    pub fn new(layout: MirrorLayout, local_base: impl Into<PathBuf>) -> Self {
        Self {
            root: layout.local_root().to_string(),
            local_base: local_base.into(),
            layout,
            policy: DiffPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DiffPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// How a single event was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Done,
    /// Command file ran; `failed` of its lines exited non-zero.
    Ran { lines: usize, failed: usize },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub event: Event,
    pub status: ItemStatus,
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Events in dispatch order.
    pub events: Vec<Event>,
    pub outcomes: Vec<ItemOutcome>,
    /// Command files seen for the first time this cycle.
    pub detected_command_files: Vec<String>,
}

impl CycleReport {
    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, ItemStatus::Failed(_)))
    }
}

/// Mutable loop state threaded through each cycle.
#[derive(Debug, Clone, Default)]
struct LoopState {
    snapshot: Snapshot,
    cycles: u64,
}

pub struct Reconciler<F: FileSystem> {
    fs: F,
    config: ReconcilerConfig,
    state: LoopState,
}

impl<F: FileSystem> Reconciler<F> {
    /// Start from an existing baseline; files in it are not re-sent.
    pub fn new(fs: F, config: ReconcilerConfig, baseline: Snapshot) -> Self {
        Self {
            fs,
            config,
            state: LoopState {
                snapshot: baseline,
                cycles: 0,
            },
        }
    }

    /// Capture the current tree as the baseline.
    pub async fn with_baseline(fs: F, config: ReconcilerConfig) -> Result<Self, LoopError> {
        let baseline = capture(&fs, &config.root)
            .await
            .map_err(|source| LoopError::Capture {
                root: config.root.clone(),
                source,
            })?;
        info!(
            "Baseline snapshot of '{}' holds {} file(s)",
            config.root,
            baseline.len()
        );
        Ok(Self::new(fs, config, baseline))
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.state.snapshot
    }

    /// Cycles completed since this reconciler was created.
    pub fn cycles(&self) -> u64 {
        self.state.cycles
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    /// Run one reconciliation cycle against `session`.
    ///
    /// Per-item failures are logged and reported; the snapshot still advances.
    /// A session-fatal error abandons the cycle and leaves the snapshot as it was.
    pub async fn run_cycle(&mut self, session: &mut dyn Session) -> Result<CycleReport, LoopError> {
        debug!("Polling for changes...");
        let cur = capture(&self.fs, &self.config.root)
            .await
            .map_err(|source| LoopError::Capture {
                root: self.config.root.clone(),
                source,
            })?;
        let diff = compute(&self.state.snapshot, &cur, &self.config.policy);

        let mut report = CycleReport {
            events: diff.events(),
            outcomes: Vec::new(),
            detected_command_files: diff.new_command_files.iter().cloned().collect(),
        };

        for path in &report.detected_command_files {
            info!("Detected command file '{}'. Modify it to run it.", path);
        }

        for event in &report.events {
            let status = self.dispatch(session, event).await?;
            report.outcomes.push(ItemOutcome {
                event: event.clone(),
                status,
            });
        }

        self.state.snapshot = cur;
        self.state.cycles += 1;
        Ok(report)
    }

    async fn dispatch(
        &self,
        session: &mut dyn Session,
        event: &Event,
    ) -> Result<ItemStatus, LoopError> {
        let layout = &self.config.layout;
        let result = match event {
            Event::Deleted { path, .. } => {
                let remote = layout.remote_path(path);
                info!("Detected deletion of '{}', removing '{}'...", path, remote);
                session.remove(&remote).await.map(|_| ItemStatus::Done)
            }
            Event::Created { path, .. } | Event::Modified { path, .. } => {
                let remote = layout.remote_path(path);
                let local = self.config.local_base.join(path);
                info!("Detected {} '{}', copying to remote...", event.label(), path);
                session.put(&local, &remote).await.map(|_| ItemStatus::Done)
            }
            Event::CommandTriggered { path, dir } => {
                info!("Detected change in command file in '{}'", dir);
                match run_command_file(session, &self.fs, layout, path, dir).await {
                    Ok(run) => Ok(ItemStatus::Ran {
                        lines: run.outcomes.len(),
                        failed: run.failed_count(),
                    }),
                    Err(CommandError::Transport(e)) => Err(e),
                    Err(e @ CommandError::Read { .. }) => {
                        warn!("{}", e);
                        return Ok(ItemStatus::Failed(e.to_string()));
                    }
                }
            }
        };

        match result {
            Ok(status) => {
                if matches!(status, ItemStatus::Done) {
                    info!("Successfully synced '{}' ({}).", event.path(), event.label());
                }
                Ok(status)
            }
            Err(e) if e.is_session_fatal() => {
                error!("Session failure while handling '{}': {}", event.path(), e);
                Err(LoopError::SessionLost(e))
            }
            Err(e) => {
                warn!("Failed to sync '{}' ({}): {}", event.path(), event.label(), e);
                Ok(ItemStatus::Failed(e.to_string()))
            }
        }
    }

    /// Run cycles until the pacer says stop. Returns the cycles completed by
    /// this call.
    pub async fn run(
        &mut self,
        session: &mut dyn Session,
        pacer: &mut dyn Pacer,
    ) -> Result<u64, LoopError> {
        let start = self.state.cycles;
        loop {
            let report = self.run_cycle(session).await?;
            if !report.events.is_empty() {
                let failed = report.failures().count();
                info!(
                    "Cycle {}: {} change(s), {} failed",
                    self.state.cycles,
                    report.events.len(),
                    failed
                );
            }
            debug!("Waiting...");
            if !pacer.pause().await {
                return Ok(self.state.cycles - start);
            }
        }
    }
}
