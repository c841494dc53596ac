//! In-memory remote host for tests.
//!
//! `MemoryRemote` is a shared handle: tests keep one clone to script failures
//! and inspect the operation log while the connector and its sessions use the
//! others.

use crate::transport::{
    Connector, ErrorKind, ExecOutput, Result, Session, SessionIdentity, TransportError,
};
use async_trait::async_trait;
use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Operation that reached the remote host successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    Connect,
    Exec(String),
    Put { local: PathBuf, remote: String },
    Get { remote: String, local: PathBuf },
    Remove(String),
    Close,
}

/// Which session call a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Exec,
    Put,
    Get,
    Remove,
}

#[derive(Default)]
struct RemoteState {
    ops: Vec<RemoteOp>,
    files: BTreeSet<String>,
    scripted_exec: Vec<(String, ExecOutput)>,
    failures: VecDeque<(OpKind, TransportError)>,
    connect_failures: VecDeque<TransportError>,
    generation: u64,
    alive: bool,
}

#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next call of `kind` fail with `error`.
    pub fn fail_next(&self, kind: OpKind, error: TransportError) {
        self.lock().failures.push_back((kind, error));
    }

    /// Make the next connection attempt fail with `error`.
    pub fn fail_next_connect(&self, error: TransportError) {
        self.lock().connect_failures.push_back(error);
    }

    /// Any exec whose command contains `pattern` returns `output`.
    pub fn script_exec(&self, pattern: &str, output: ExecOutput) {
        self.lock().scripted_exec.push((pattern.to_string(), output));
    }

    /// Kill every open session; calls fail with a connection reset until a
    /// new session is connected.
    pub fn drop_connection(&self) {
        self.lock().alive = false;
    }

    pub fn ops(&self) -> Vec<RemoteOp> {
        self.lock().ops.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| matches!(op, RemoteOp::Connect))
            .count()
    }

    pub fn exec_commands(&self) -> Vec<String> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                RemoteOp::Exec(command) => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    /// Remote paths written by `put`, in order, with repeats.
    pub fn puts(&self) -> Vec<String> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                RemoteOp::Put { remote, .. } => Some(remote.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn removes(&self) -> Vec<String> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                RemoteOp::Remove(remote) => Some(remote.clone()),
                _ => None,
            })
            .collect()
    }

    /// Remote paths currently present.
    pub fn files(&self) -> BTreeSet<String> {
        self.lock().files.clone()
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            remote: self.clone(),
        }
    }

    /// Open a session directly, bypassing connect failures.
    pub fn open_session(&self) -> MemorySession {
        let mut state = self.lock();
        state.generation += 1;
        state.alive = true;
        state.ops.push(RemoteOp::Connect);
        MemorySession {
            remote: self.clone(),
            generation: state.generation,
        }
    }
}

pub struct MemorySession {
    remote: MemoryRemote,
    generation: u64,
}

impl MemorySession {
    /// Check liveness and scripted failures, then record the op.
    fn perform(&self, kind: OpKind, op: RemoteOp) -> Result<()> {
        let mut state = self.remote.lock();
        if !state.alive || state.generation != self.generation {
            return Err(TransportError::new(
                ErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }
        if let Some(pos) = state.failures.iter().position(|(k, _)| *k == kind) {
            if let Some((_, error)) = state.failures.remove(pos) {
                if error.is_session_fatal() {
                    state.alive = false;
                }
                return Err(error);
            }
        }
        match &op {
            RemoteOp::Put { remote, .. } => {
                state.files.insert(remote.clone());
            }
            RemoteOp::Remove(remote) => {
                state.files.remove(remote);
            }
            _ => {}
        }
        state.ops.push(op);
        Ok(())
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput> {
        self.perform(OpKind::Exec, RemoteOp::Exec(command.to_string()))?;
        let state = self.remote.lock();
        Ok(state
            .scripted_exec
            .iter()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| ExecOutput::success("")))
    }

    async fn put(&mut self, local: &Path, remote: &str) -> Result<()> {
        self.perform(
            OpKind::Put,
            RemoteOp::Put {
                local: local.to_path_buf(),
                remote: remote.to_string(),
            },
        )
    }

    async fn get(&mut self, remote: &str, local: &Path) -> Result<()> {
        self.perform(
            OpKind::Get,
            RemoteOp::Get {
                remote: remote.to_string(),
                local: local.to_path_buf(),
            },
        )
    }

    async fn remove(&mut self, remote: &str) -> Result<()> {
        self.perform(OpKind::Remove, RemoteOp::Remove(remote.to_string()))
    }

    async fn close(&mut self) {
        let mut state = self.remote.lock();
        if state.generation == self.generation {
            state.alive = false;
        }
        state.ops.push(RemoteOp::Close);
    }
}

pub struct MemoryConnector {
    remote: MemoryRemote,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _identity: &SessionIdentity) -> Result<Box<dyn Session>> {
        let failure = self.remote.lock().connect_failures.pop_front();
        if let Some(error) = failure {
            self.remote.lock().ops.push(RemoteOp::Connect);
            return Err(error);
        }
        Ok(Box::new(self.remote.open_session()))
    }
}
