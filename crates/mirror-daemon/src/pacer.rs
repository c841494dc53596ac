//! Pacing for the daemon: sleep between cycles, wake early on file events,
//! stop on shutdown.

use crate::watcher::FileWatcher;
use async_trait::async_trait;
use mirror_core::Pacer;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

pub struct DaemonPacer {
    interval: Duration,
    watcher: Option<FileWatcher>,
    shutdown: watch::Receiver<bool>,
}

impl DaemonPacer {
    pub fn new(interval: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            interval,
            watcher: None,
            shutdown,
        }
    }

    pub fn with_watcher(mut self, watcher: FileWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }
}

enum Wake {
    Elapsed,
    Changed,
    WatcherClosed,
    Shutdown,
}

#[async_trait]
impl Pacer for DaemonPacer {
    async fn pause(&mut self) -> bool {
        if self.shutdown_requested() {
            return false;
        }

        let sleep = tokio::time::sleep(self.interval);
        tokio::pin!(sleep);

        let wake = match self.watcher.as_mut() {
            Some(watcher) => {
                tokio::select! {
                    _ = &mut sleep => Wake::Elapsed,
                    event = watcher.event_rx().recv() => match event {
                        Some(event) => {
                            debug!("Woken by change to {}", event.path);
                            // Coalesce whatever else is already queued.
                            while watcher.event_rx().try_recv().is_ok() {}
                            Wake::Changed
                        }
                        None => Wake::WatcherClosed,
                    },
                    _ = self.shutdown.changed() => Wake::Shutdown,
                }
            }
            None => {
                tokio::select! {
                    _ = &mut sleep => Wake::Elapsed,
                    _ = self.shutdown.changed() => Wake::Shutdown,
                }
            }
        };

        match wake {
            Wake::Elapsed | Wake::Changed => !self.shutdown_requested(),
            Wake::WatcherClosed => {
                debug!("File watcher closed; falling back to polling");
                self.watcher = None;
                // Finish the interval that was interrupted.
                tokio::select! {
                    _ = &mut sleep => !self.shutdown_requested(),
                    _ = self.shutdown.changed() => {
                        info!("Shutdown requested");
                        false
                    }
                }
            }
            Wake::Shutdown => {
                info!("Shutdown requested");
                false
            }
        }
    }
}
