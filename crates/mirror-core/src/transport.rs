//! Session and Connector traits for the remote side of the mirror.
//!
//! Implementations:
//! - `MemoryConnector` / `MemorySession` - For testing
//! - `OpenSshConnector` (in mirror-daemon) - Spawns the system ssh/scp binaries

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// What went wrong, as far as the reconnect policy cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credentials rejected.
    Auth,
    /// Host unreachable, name resolution failed, connection refused or timed out.
    Network,
    /// An established connection was reset or closed by the peer.
    ConnectionReset,
    /// Any other failure of the session itself.
    Session,
    /// A single file transfer or remote delete failed; the session is fine.
    Transfer,
}

impl ErrorKind {
    /// Errors that mean the session is gone and only a reconnect can help.
    pub fn is_session_fatal(self) -> bool {
        !matches!(self, ErrorKind::Transfer)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Auth => "authentication",
            ErrorKind::Network => "network",
            ErrorKind::ConnectionReset => "connection reset",
            ErrorKind::Session => "session",
            ErrorKind::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn connection_reset(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionReset, message)
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Session, message)
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transfer, message)
    }

    pub fn is_session_fatal(&self) -> bool {
        self.kind.is_session_fatal()
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Who to connect as, where, and which remote directory is mirrored.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub host: String,
    pub user: String,
    /// Password, if the transport needs one. Never logged.
    pub secret: Option<String>,
    /// Absolute remote directory being mirrored.
    pub remote_root: String,
}

impl fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("host", &self.host)
            .field("user", &self.user)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("remote_root", &self.remote_root)
            .finish()
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// Output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status, if the remote side reported one.
    pub exit_status: Option<i32>,
}

impl ExecOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_status: Some(0),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_status: Some(code),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_status == Some(0)
    }

    /// Stdout lines followed by stderr lines.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines().chain(self.stderr.lines())
    }
}

/// A live connection to the remote host.
///
/// Every call waits for the remote operation to finish.
#[async_trait]
pub trait Session: Send {
    /// Run a shell command and collect its output.
    ///
    /// A non-zero exit is reported through `ExecOutput`, not as an error.
    async fn exec(&mut self, command: &str) -> Result<ExecOutput>;

    /// Copy a local file or directory to the remote host, preserving timestamps.
    async fn put(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// Copy a remote file or directory to the local host, preserving timestamps.
    async fn get(&mut self, remote: &str, local: &Path) -> Result<()>;

    /// Delete a remote file.
    async fn remove(&mut self, remote: &str) -> Result<()>;

    /// Tear the session down. Best effort.
    async fn close(&mut self);
}

/// Opens sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, identity: &SessionIdentity) -> Result<Box<dyn Session>>;
}
