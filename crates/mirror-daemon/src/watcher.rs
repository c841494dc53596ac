//! Debounced file watcher used to wake the poll loop early.
//!
//! Events are only hints. The next cycle still captures a full snapshot, so
//! a missed or spurious event never changes what gets mirrored.

use anyhow::Result;
use mirror_core::DiffPolicy;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// A change somewhere under the mirrored directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Path relative to the watched directory's parent, e.g. `proj/src/main.c`
    pub path: String,
    pub exists: bool,
}

pub struct FileWatcher {
    root: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

impl FileWatcher {
    /// Watch `base/local_root` recursively with a 200ms debounce.
    pub fn new(base: &Path, local_root: &str, policy: DiffPolicy) -> Result<Self> {
        // FSEvents on macOS reports canonical paths (/private/var/...).
        let base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
        let root = base.join(local_root);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let callback_base = base.clone();

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        let Some(file_event) = relevant_event(&event.path, &callback_base, &policy)
                        else {
                            continue;
                        };
                        if event_tx.send(file_event).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => error!("File watcher error: {}", e),
            },
        )?;

        debouncer.watcher().watch(&root, RecursiveMode::Recursive)?;
        debug!("Watching {:?}", root);

        Ok(Self {
            root,
            _debouncer: debouncer,
            event_rx,
        })
    }

    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<FileEvent> {
        &mut self.event_rx
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Translate a raw path into an event, dropping temp files.
fn relevant_event(path: &Path, base: &Path, policy: &DiffPolicy) -> Option<FileEvent> {
    let relative = path.strip_prefix(base).ok()?.to_str()?;
    let relative = relative.replace('\\', "/");
    if relative.is_empty() || policy.is_temp_file(&relative) {
        return None;
    }
    Some(FileEvent {
        exists: path.exists(),
        path: relative,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_relevant_event_filters_temp_files() {
        let dir = TempDir::new().unwrap();
        let base = dir.path();
        std::fs::create_dir_all(base.join("proj")).unwrap();
        std::fs::write(base.join("proj/a.txt"), b"a").unwrap();
        let policy = DiffPolicy::default();

        let event = relevant_event(&base.join("proj/a.txt"), base, &policy).unwrap();
        assert_eq!(
            event,
            FileEvent {
                path: "proj/a.txt".into(),
                exists: true
            }
        );

        let gone = relevant_event(&base.join("proj/b.txt"), base, &policy).unwrap();
        assert!(!gone.exists);

        assert!(relevant_event(&base.join("proj/.a.txt.swp"), base, &policy).is_none());
        assert!(relevant_event(Path::new("/elsewhere/x"), base, &policy).is_none());
    }

    #[tokio::test]
    async fn test_watcher_reports_new_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("proj")).unwrap();
        let mut watcher = FileWatcher::new(dir.path(), "proj", DiffPolicy::default()).unwrap();

        std::fs::write(dir.path().join("proj/new.txt"), b"x").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), watcher.event_rx().recv())
            .await
            .expect("no event within timeout")
            .expect("channel closed");
        assert!(event.path.starts_with("proj"));
    }
}
