//! OpenSSH transport built on the system `ssh` and `scp` binaries.
//!
//! A multiplexed control master is the live session: it is started by
//! `connect`, every exec/transfer rides on its control socket, and `close`
//! shuts it down. When a password is configured the binaries run under
//! `sshpass -e`, with the password passed through the child's environment.

use async_trait::async_trait;
use mirror_core::layout::shell_quote;
use mirror_core::transport::{
    Connector, ErrorKind, ExecOutput, Result, Session, SessionIdentity, TransportError,
};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Exit status ssh uses for its own failures.
const SSH_FAILURE: i32 = 255;
/// sshpass: the password was rejected.
const SSHPASS_BAD_PASSWORD: i32 = 5;
/// sshpass: host key unknown or changed.
const SSHPASS_HOST_KEY: i32 = 6;

#[derive(Debug, Clone)]
pub struct SshOptions {
    pub ssh_program: String,
    pub scp_program: String,
    pub sshpass_program: String,
    pub connect_timeout: Duration,
    /// Directory for control sockets.
    pub control_dir: PathBuf,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            sshpass_program: "sshpass".to_string(),
            connect_timeout: Duration::from_secs(10),
            control_dir: std::env::temp_dir(),
        }
    }
}

/// Map a failed ssh/scp invocation onto an error kind using its stderr.
///
/// `fallback` is used when nothing recognizable was printed.
pub fn classify_failure(stderr: &str, fallback: ErrorKind) -> ErrorKind {
    let lower = stderr.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&[
        "permission denied (",
        "authentication failed",
        "too many authentication failures",
        "host key verification failed",
    ]) {
        ErrorKind::Auth
    } else if has(&[
        "connection reset",
        "broken pipe",
        "connection closed",
        "lost connection",
        "control socket connect",
        "mux_client",
    ]) {
        ErrorKind::ConnectionReset
    } else if has(&[
        "could not resolve hostname",
        "name or service not known",
        "connection refused",
        "timed out",
        "no route to host",
        "network is unreachable",
    ]) {
        ErrorKind::Network
    } else {
        fallback
    }
}

pub struct OpenSshConnector {
    options: SshOptions,
}

impl OpenSshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

impl Default for OpenSshConnector {
    fn default() -> Self {
        Self::new(SshOptions::default())
    }
}

#[async_trait]
impl Connector for OpenSshConnector {
    async fn connect(&self, identity: &SessionIdentity) -> Result<Box<dyn Session>> {
        let control_path = self
            .options
            .control_dir
            .join(format!("mirror-{}.sock", uuid::Uuid::new_v4().simple()));
        let session = OpenSshSession {
            identity: identity.clone(),
            options: self.options.clone(),
            control_path,
        };

        // The first connection becomes the persistent master and detaches.
        let mut command = session.command(&self.options.ssh_program);
        command
            .args(session.common_options("auto"))
            .arg("-o")
            .arg("ControlPersist=yes")
            .arg(session.destination())
            .arg("true");
        let output = run(command, &self.options.ssh_program).await?;
        if !output.status.success() {
            return Err(session.failure(&output, ErrorKind::Network));
        }

        debug!("Control master up at {:?}", session.control_path);
        Ok(Box::new(session))
    }
}

pub struct OpenSshSession {
    identity: SessionIdentity,
    options: SshOptions,
    control_path: PathBuf,
}

impl OpenSshSession {
    fn destination(&self) -> String {
        format!("{}@{}", self.identity.user, self.identity.host)
    }

    /// Start `program`, wrapped in sshpass when a password is configured.
    fn command(&self, program: &str) -> Command {
        let mut command = match &self.identity.secret {
            Some(secret) => {
                let mut command = Command::new(&self.options.sshpass_program);
                command.arg("-e").arg(program).env("SSHPASS", secret);
                command
            }
            None => Command::new(program),
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    fn common_options(&self, control_master: &str) -> Vec<String> {
        let mut options = vec![
            "-o".to_string(),
            format!("ControlMaster={}", control_master),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
        ];
        if self.identity.secret.is_none() {
            options.push("-o".to_string());
            options.push("BatchMode=yes".to_string());
        }
        options
    }

    /// Error for a failed ssh/scp run. sshpass exit codes are only trusted
    /// for ssh and scp themselves, never for a remote command.
    fn failure(&self, output: &Output, fallback: ErrorKind) -> TransportError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = output.status.code();
        let kind = if self.identity.secret.is_some()
            && matches!(code, Some(SSHPASS_BAD_PASSWORD) | Some(SSHPASS_HOST_KEY))
        {
            ErrorKind::Auth
        } else {
            classify_failure(&stderr, fallback)
        };
        let message = if stderr.is_empty() {
            format!("exited with status {:?}", code)
        } else {
            stderr
        };
        TransportError::new(kind, message)
    }

    /// `user@host:'path'` for scp.
    fn remote_target(&self, remote: &str) -> String {
        format!("{}:{}", self.destination(), shell_quote(remote))
    }

    fn scp_command(&self, from: &str, to: &str) -> Command {
        let mut command = self.command(&self.options.scp_program);
        // Legacy protocol: the remote path goes through the remote shell, so
        // the quoting in `remote_target` is what it sees.
        command
            .args(self.common_options("no"))
            .arg("-O")
            .arg("-p")
            .arg("-r")
            .arg("-q")
            .arg(from)
            .arg(to);
        command
    }

    async fn scp(&self, from: &str, to: &str) -> Result<()> {
        let command = self.scp_command(from, to);
        let output = run(command, &self.options.scp_program).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(self.failure(&output, ErrorKind::Transfer))
        }
    }

    /// Run a housekeeping command; a non-zero exit is a transfer error.
    async fn exec_checked(&mut self, command: &str) -> Result<()> {
        let output = self.exec(command).await?;
        if output.succeeded() {
            Ok(())
        } else {
            Err(TransportError::transfer(format!(
                "'{}' failed: {}",
                command,
                output.stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl Session for OpenSshSession {
    async fn exec(&mut self, remote_command: &str) -> Result<ExecOutput> {
        let mut command = self.command(&self.options.ssh_program);
        command
            .args(self.common_options("no"))
            .arg(self.destination())
            .arg("--")
            .arg(remote_command);
        let output = run(command, &self.options.ssh_program).await?;

        let code = output.status.code();
        // Any other status belongs to the remote command.
        if code == Some(SSH_FAILURE) || code.is_none() {
            return Err(self.failure(&output, ErrorKind::Session));
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_status: code,
        })
    }

    async fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        if let Some((parent, _)) = remote.rsplit_once('/') {
            if !parent.is_empty() {
                self.exec_checked(&format!("mkdir -p -- {}", shell_quote(parent)))
                    .await?;
            }
        }
        let to = self.remote_target(remote);
        self.scp(&local.to_string_lossy(), &to).await
    }

    async fn get(&mut self, remote: &str, local: &Path) -> Result<()> {
        let from = self.remote_target(remote);
        self.scp(&from, &local.to_string_lossy()).await
    }

    async fn remove(&mut self, remote: &str) -> Result<()> {
        self.exec_checked(&format!("rm -f -- {}", shell_quote(remote)))
            .await
    }

    async fn close(&mut self) {
        let mut command = self.command(&self.options.ssh_program);
        command
            .arg("-O")
            .arg("exit")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg(self.destination());
        if let Err(e) = run(command, &self.options.ssh_program).await {
            debug!("Failed to stop control master: {}", e);
        }
        // ssh normally removes the socket itself on exit.
        if let Err(e) = tokio::fs::remove_file(&self.control_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!("Failed to remove control socket {:?}: {}", self.control_path, e);
            }
        }
    }
}

/// Spawn and wait; failing to spawn at all is a session error.
async fn run(mut command: Command, program: &str) -> Result<Output> {
    command
        .output()
        .await
        .map_err(|e| TransportError::session(format!("Failed to run {}: {}", program, e)))
}
