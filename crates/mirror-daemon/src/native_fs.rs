//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use mirror_core::fs::{
    mtime_from_system_time, EntryKind, FileEntry, FileStat, FileSystem, FsError, Result,
};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Native filesystem rooted at a base directory (the working directory for the daemon).
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.full_path(path))
            .await
            .map_err(|e| FsError::io(path, e))
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let full_path = self.full_path(path);
        let mut entries = Vec::new();

        let mut dir = fs::read_dir(&full_path)
            .await
            .map_err(|e| FsError::io(path, e))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| FsError::io(path, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            // file_type() does not follow symlinks.
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| FsError::io(path, e))?;

            let kind = if file_type.is_file() {
                EntryKind::File
            } else if file_type.is_dir() {
                EntryKind::Dir
            } else {
                EntryKind::Other
            };
            entries.push(FileEntry { name, kind });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let metadata = fs::metadata(self.full_path(path))
            .await
            .map_err(|e| FsError::io(path, e))?;

        let mtime = metadata
            .modified()
            .map(mtime_from_system_time)
            .map_err(|e| FsError::io(path, e))?;

        Ok(FileStat {
            mtime,
            size: metadata.len(),
        })
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        fs::try_exists(self.full_path(path))
            .await
            .map_err(|e| FsError::io(path, e))
    }
}
