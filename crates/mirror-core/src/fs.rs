//! FileSystem trait abstraction for the local side of the mirror.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in mirror-daemon) - Uses tokio::fs relative to a base directory
//!
//! Paths are relative to the implementation's base and always use `/`.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("IO error at {path}: {message}")]
    Io { path: String, message: String },
}

impl FsError {
    pub fn io(path: impl Into<String>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound(path.into());
        }
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Modification time in nanoseconds since the Unix epoch.
pub type Mtime = u64;

/// What a directory entry is, without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    /// Symlinks, sockets, fifos and the like. Never recorded or followed.
    Other,
}

/// Directory entry
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    pub kind: EntryKind,
}

/// File metadata
#[derive(Debug, Clone)]
pub struct FileStat {
    pub mtime: Mtime,
    pub size: u64,
}

/// Convert a `SystemTime` into an [`Mtime`], clamping pre-epoch times to zero.
pub fn mtime_from_system_time(time: SystemTime) -> Mtime {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

/// Read-only view of the local tree being mirrored.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// List directory contents
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Get file metadata
    async fn stat(&self, path: &str) -> Result<FileStat>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;
}

#[derive(Debug, Clone)]
struct MemFile {
    content: Vec<u8>,
    mtime: Mtime,
}

/// In-memory filesystem for testing.
///
/// Directories are implied by file paths; `mkdir` only matters for empty ones.
/// Every write bumps a logical clock so successive writes always look newer.
pub struct InMemoryFs {
    files: RwLock<BTreeMap<String, MemFile>>,
    dirs: RwLock<BTreeSet<String>>,
    specials: RwLock<BTreeSet<String>>,
    clock: RwLock<Mtime>,
}

impl InMemoryFs {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(BTreeMap::new()),
            dirs: RwLock::new(BTreeSet::new()),
            specials: RwLock::new(BTreeSet::new()),
            clock: RwLock::new(0),
        }
    }

    fn normalize(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn tick(&self) -> Mtime {
        let mut clock = self.clock.write().unwrap();
        *clock += 1;
        *clock
    }

    fn register_parents(&self, path: &str) {
        let mut dirs = self.dirs.write().unwrap();
        let mut current = path;
        while let Some(pos) = current.rfind('/') {
            current = &current[..pos];
            dirs.insert(current.to_string());
        }
    }

    /// Write a file, stamping it with the next logical time.
    pub fn write(&self, path: &str, content: &[u8]) {
        let mtime = self.tick();
        self.write_with_mtime(path, content, mtime);
    }

    /// Write a file with an explicit modification time.
    pub fn write_with_mtime(&self, path: &str, content: &[u8], mtime: Mtime) {
        let path = Self::normalize(path);
        self.register_parents(&path);
        {
            let mut clock = self.clock.write().unwrap();
            *clock = (*clock).max(mtime);
        }
        self.files.write().unwrap().insert(
            path,
            MemFile {
                content: content.to_vec(),
                mtime,
            },
        );
    }

    /// Change only the modification time of an existing file.
    pub fn set_mtime(&self, path: &str, mtime: Mtime) {
        let path = Self::normalize(path);
        if let Some(file) = self.files.write().unwrap().get_mut(&path) {
            file.mtime = mtime;
        }
    }

    /// Bump the modification time without changing content.
    pub fn touch(&self, path: &str) {
        let mtime = self.tick();
        self.set_mtime(path, mtime);
    }

    pub fn mkdir(&self, path: &str) {
        let path = Self::normalize(path);
        self.register_parents(&path);
        self.dirs.write().unwrap().insert(path);
    }

    /// Add an entry that is neither a file nor a directory (e.g. a symlink).
    pub fn add_special(&self, path: &str) {
        let path = Self::normalize(path);
        self.register_parents(&path);
        self.specials.write().unwrap().insert(path);
    }

    pub fn remove(&self, path: &str) {
        let path = Self::normalize(path);
        self.files.write().unwrap().remove(&path);
    }

    fn is_dir(&self, path: &str) -> bool {
        path.is_empty() || self.dirs.read().unwrap().contains(path)
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

/// Name of the direct child of `dir` that `path` lives under, and whether
/// `path` is that child itself rather than something nested below it.
fn child_name<'a>(dir: &str, path: &'a str) -> Option<(&'a str, bool)> {
    let rest = if dir.is_empty() {
        path
    } else {
        path.strip_prefix(dir)?.strip_prefix('/')?
    };
    let name = rest.split('/').next().filter(|name| !name.is_empty())?;
    Some((name, name.len() == rest.len()))
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize(path);
        self.files
            .read()
            .unwrap()
            .get(&path)
            .map(|f| f.content.clone())
            .ok_or(FsError::NotFound(path))
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = Self::normalize(path);
        if !self.is_dir(&path) {
            if self.files.read().unwrap().contains_key(&path) {
                return Err(FsError::NotDirectory(path));
            }
            return Err(FsError::NotFound(path));
        }

        let mut entries: BTreeMap<String, EntryKind> = BTreeMap::new();
        for dir in self.dirs.read().unwrap().iter() {
            if let Some((name, _)) = child_name(&path, dir) {
                entries.insert(name.to_string(), EntryKind::Dir);
            }
        }
        for file in self.files.read().unwrap().keys() {
            if let Some((name, direct)) = child_name(&path, file) {
                let kind = if direct { EntryKind::File } else { EntryKind::Dir };
                entries.entry(name.to_string()).or_insert(kind);
            }
        }
        for special in self.specials.read().unwrap().iter() {
            if let Some((name, _)) = child_name(&path, special) {
                entries
                    .entry(name.to_string())
                    .or_insert(EntryKind::Other);
            }
        }

        Ok(entries
            .into_iter()
            .map(|(name, kind)| FileEntry { name, kind })
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let path = Self::normalize(path);
        if let Some(file) = self.files.read().unwrap().get(&path) {
            return Ok(FileStat {
                mtime: file.mtime,
                size: file.content.len() as u64,
            });
        }
        if self.is_dir(&path) {
            return Ok(FileStat { mtime: 0, size: 0 });
        }
        Err(FsError::NotFound(path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize(path);
        Ok(self.files.read().unwrap().contains_key(&path) || self.is_dir(&path))
    }
}

// Lets tests keep a handle on the filesystem the reconciler owns.
#[async_trait]
impl<T: FileSystem> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        (**self).stat(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }
}
