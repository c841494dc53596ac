//! Command files: run each line of a triggered command file on the remote host.

use crate::fs::{FileSystem, FsError};
use crate::layout::{shell_quote, MirrorLayout};
use crate::transport::{ExecOutput, Session, TransportError};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    /// The command file could not be read; nothing was executed.
    #[error("Failed to read command file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: FsError,
    },

    /// The session died part-way through.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result of one command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// The line as written in the command file.
    pub line: String,
    /// The full remote invocation.
    pub invocation: String,
    pub output: ExecOutput,
}

/// Everything one command file produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandRun {
    pub outcomes: Vec<CommandOutcome>,
}

impl CommandRun {
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.output.succeeded()).count()
    }
}

/// Non-blank lines of a command file, in order, without line endings.
pub fn command_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Remote invocation that runs `line` inside the remote twin of `dir`.
pub fn remote_invocation(layout: &MirrorLayout, dir: &str, line: &str) -> String {
    format!("cd {} && {}", shell_quote(&layout.remote_path(dir)), line)
}

/// Run every line of `path` in the remote counterpart of `dir`.
///
/// Lines run sequentially; a non-zero exit is logged and the next line still
/// runs. Only a session-level transport error stops the run.
pub async fn run_command_file<F: FileSystem + ?Sized>(
    session: &mut dyn Session,
    fs: &F,
    layout: &MirrorLayout,
    path: &str,
    dir: &str,
) -> Result<CommandRun, CommandError> {
    let content = fs.read(path).await.map_err(|source| CommandError::Read {
        path: path.to_string(),
        source,
    })?;
    let content = String::from_utf8_lossy(&content);

    let mut run = CommandRun::default();
    for line in command_lines(&content) {
        let invocation = remote_invocation(layout, dir, &line);
        info!("Executing '{}' on remote machine...", invocation);

        let output = match session.exec(&invocation).await {
            Ok(output) => output,
            Err(e) if e.is_session_fatal() => return Err(e.into()),
            Err(e) => {
                warn!("Failed to execute '{}': {}", line, e);
                ExecOutput {
                    stderr: e.to_string(),
                    ..ExecOutput::default()
                }
            }
        };

        for text in output.lines() {
            info!("{}", text);
        }
        match output.exit_status {
            Some(0) => info!("Execution finished."),
            Some(code) => warn!("'{}' exited with status {}", line, code),
            None => warn!("'{}' finished without an exit status", line),
        }

        run.outcomes.push(CommandOutcome {
            line,
            invocation,
            output,
        });
    }

    Ok(run)
}
