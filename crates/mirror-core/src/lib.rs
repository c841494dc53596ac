//! mirror-core: reconciliation engine that mirrors a local tree onto a remote host.
//!
//! This crate provides:
//! - Snapshot capture of file modification times through a `FileSystem` trait
//! - Diffing of snapshots with command-file and temp-file policy
//! - Remote execution of command files
//! - The reconciler loop and the session guardian that reconnects it
//! - `Session`/`Connector` traits for the transport, plus in-memory doubles

pub mod command;
pub mod diff;
pub mod fs;
pub mod guardian;
pub mod layout;
pub mod memory;
pub mod reconciler;
pub mod snapshot;
pub mod transport;

pub use diff::{compute, Diff, DiffPolicy, Event};
pub use fs::{FileSystem, FsError, InMemoryFs, Mtime};
pub use guardian::{GuardianConfig, GuardianError, GuardianSummary, SessionGuardian};
pub use layout::MirrorLayout;
pub use memory::{MemoryConnector, MemoryRemote};
pub use reconciler::{CycleReport, IntervalPacer, LoopError, Pacer, Reconciler, ReconcilerConfig};
pub use snapshot::{capture, Snapshot};
pub use transport::{Connector, ErrorKind, ExecOutput, Session, SessionIdentity, TransportError};
