//! mirror-daemon library: exposes the daemon components for integration tests.

pub mod config;
pub mod initial;
pub mod native_fs;
pub mod pacer;
pub mod ssh;
pub mod watcher;

pub use config::{load_policy, Args, ConfigError, InitialSync};
pub use native_fs::NativeFs;
pub use pacer::DaemonPacer;
pub use ssh::{OpenSshConnector, OpenSshSession, SshOptions};
pub use watcher::{FileEvent, FileWatcher};
