//! Snapshot capture: a path → modification-time map of the local tree.

use crate::fs::{EntryKind, FileSystem, FsError, Mtime, Result};
use std::collections::BTreeMap;

/// Observed state of the local tree at one poll.
///
/// Keys are paths relative to the filesystem base, `/`-separated, and include
/// the mirror root as their first component (`proj/src/main.c`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: BTreeMap<String, Mtime>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<Mtime> {
        self.entries.get(path).copied()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Mtime)> {
        self.entries.iter().map(|(path, mtime)| (path.as_str(), *mtime))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl<P: AsRef<str>> FromIterator<(P, Mtime)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (P, Mtime)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(path, mtime)| (normalize_path(path.as_ref()), mtime))
                .collect(),
        }
    }
}

/// Normalize a relative path to `/` separators with no leading `./`,
/// trailing slash or empty components.
pub fn normalize_path(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Directory part of a normalized path (`""` for top-level entries).
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|pos| &path[..pos]).unwrap_or("")
}

/// Basename of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.rfind('/').map(|pos| &path[pos + 1..]).unwrap_or(path)
}

/// Walk `root` and record every regular file's modification time.
///
/// Symlinks and other non-regular entries are skipped without being followed.
pub async fn capture<F: FileSystem + ?Sized>(fs: &F, root: &str) -> Result<Snapshot> {
    let root = normalize_path(root);
    let mut entries = BTreeMap::new();
    let mut pending = vec![root.clone()];

    while let Some(dir) = pending.pop() {
        let listing = match fs.list(&dir).await {
            Ok(listing) => listing,
            // Raced with a deletion below the root; the next poll sees it gone.
            Err(FsError::NotFound(_)) if dir != root => continue,
            Err(e) => return Err(e),
        };

        for entry in listing {
            let path = if dir.is_empty() {
                entry.name
            } else {
                format!("{}/{}", dir, entry.name)
            };
            match entry.kind {
                EntryKind::Dir => pending.push(path),
                EntryKind::File => match fs.stat(&path).await {
                    Ok(stat) => {
                        entries.insert(path, stat.mtime);
                    }
                    Err(FsError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                },
                EntryKind::Other => {}
            }
        }
    }

    Ok(Snapshot { entries })
}
