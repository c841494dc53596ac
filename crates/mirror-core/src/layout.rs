//! Mapping between local snapshot keys and remote paths.

use crate::snapshot::normalize_path;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Remote directory must be an absolute path: {0}")]
    NotAbsolute(String),

    #[error("Remote directory cannot be the filesystem root")]
    RootDirectory,
}

/// Where the mirror lives on both sides.
///
/// A remote directory `/home/u/proj` is mirrored into a local directory `proj`
/// under the working directory. Snapshot keys start with that local root, so a
/// key maps onto the remote side by prefixing the remote parent (`/home/u`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorLayout {
    remote_parent: String,
    local_root: String,
}

impl MirrorLayout {
    pub fn from_remote_dir(remote_dir: &str) -> Result<Self, LayoutError> {
        if !remote_dir.starts_with('/') {
            return Err(LayoutError::NotAbsolute(remote_dir.to_string()));
        }
        let trimmed = remote_dir.trim_end_matches('/');
        let (parent, name) = trimmed.rsplit_once('/').ok_or(LayoutError::RootDirectory)?;
        if name.is_empty() {
            return Err(LayoutError::RootDirectory);
        }
        Ok(Self {
            remote_parent: parent.to_string(),
            local_root: name.to_string(),
        })
    }

    /// Directory that contains the mirrored directory on the remote host.
    /// Empty when the mirrored directory sits directly under `/`.
    pub fn remote_parent(&self) -> &str {
        &self.remote_parent
    }

    /// Name of the local mirror directory, relative to the working directory.
    pub fn local_root(&self) -> &str {
        &self.local_root
    }

    /// Full remote path of the mirrored directory.
    pub fn remote_dir(&self) -> String {
        format!("{}/{}", self.remote_parent, self.local_root)
    }

    /// Remote path for a local key such as `proj/src/main.c` or `proj/src`.
    pub fn remote_path(&self, local: &str) -> String {
        let local = normalize_path(local);
        if local.is_empty() {
            return if self.remote_parent.is_empty() {
                "/".to_string()
            } else {
                self.remote_parent.clone()
            };
        }
        format!("{}/{}", self.remote_parent, local)
    }
}

/// Quote a string for a POSIX shell using single quotes.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_remote_dir_splits_parent_and_root() {
        let layout = MirrorLayout::from_remote_dir("/home/user/proj/").unwrap();
        assert_eq!(layout.remote_parent(), "/home/user");
        assert_eq!(layout.local_root(), "proj");
        assert_eq!(layout.remote_dir(), "/home/user/proj");
    }

    #[test]
    fn test_from_remote_dir_rejects_bad_input() {
        assert_eq!(
            MirrorLayout::from_remote_dir("proj"),
            Err(LayoutError::NotAbsolute("proj".into()))
        );
        assert_eq!(
            MirrorLayout::from_remote_dir("/"),
            Err(LayoutError::RootDirectory)
        );
    }

    #[test]
    fn test_remote_path_for_keys() {
        let layout = MirrorLayout::from_remote_dir("/srv/proj").unwrap();
        assert_eq!(layout.remote_path("proj/a/b.txt"), "/srv/proj/a/b.txt");
        assert_eq!(layout.remote_path("proj\\a"), "/srv/proj/a");
        assert_eq!(layout.remote_path(""), "/srv");

        let top = MirrorLayout::from_remote_dir("/proj").unwrap();
        assert_eq!(top.remote_path("proj/x"), "/proj/x");
        assert_eq!(top.remote_path(""), "/");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/srv/my dir"), "'/srv/my dir'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
