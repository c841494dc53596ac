//! One-time alignment of the local and remote directories before polling.

use crate::config::InitialSync;
use anyhow::{bail, Context, Result};
use mirror_core::{MirrorLayout, Session};
use std::path::Path;
use tracing::info;

/// Bring the local copy in line with the remote according to `mode`.
///
/// `base` is the directory the local copy lives in (the working directory).
/// On success `base/<local_root>` exists.
pub async fn perform(
    mode: InitialSync,
    session: &mut dyn Session,
    layout: &MirrorLayout,
    base: &Path,
) -> Result<()> {
    let local_dir = base.join(layout.local_root());

    match mode {
        InitialSync::CopyFromRemote => {
            info!("Copying {} into {:?}...", layout.remote_dir(), base);
            session
                .get(&layout.remote_dir(), base)
                .await
                .with_context(|| format!("Failed to copy {} from remote", layout.remote_dir()))?;
        }
        InitialSync::TransferToRemote => {
            if !local_dir.is_dir() {
                bail!("Local directory {:?} does not exist; nothing to transfer", local_dir);
            }
            let parent = match layout.remote_parent() {
                "" => "/",
                parent => parent,
            };
            info!("Transferring {:?} to {}...", local_dir, parent);
            session
                .put(&local_dir, parent)
                .await
                .with_context(|| format!("Failed to transfer {:?} to remote", local_dir))?;
        }
        InitialSync::AssumeSynced => {
            info!("Assuming {:?} already matches {}", local_dir, layout.remote_dir());
        }
    }

    if !local_dir.is_dir() {
        bail!(
            "No local copy of {} exists at {:?}. Run with --copy-from-remote first",
            layout.remote_dir(),
            local_dir
        );
    }
    Ok(())
}
