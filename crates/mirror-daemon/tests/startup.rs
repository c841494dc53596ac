//! Startup path: settings file loading and the initial sync modes.

use mirror_core::memory::{OpKind, RemoteOp};
use mirror_core::{DiffPolicy, MemoryRemote, MirrorLayout, TransportError};
use mirror_daemon::{initial, load_policy, InitialSync};
use tempfile::TempDir;

fn layout() -> MirrorLayout {
    MirrorLayout::from_remote_dir("/srv/proj").unwrap()
}

/// Operations after the session was opened.
fn session_ops(remote: &MemoryRemote) -> Vec<RemoteOp> {
    remote
        .ops()
        .into_iter()
        .filter(|op| *op != RemoteOp::Connect)
        .collect()
}

// ============================================================================
// Settings file
// ============================================================================

#[test]
fn test_no_settings_file_uses_defaults() {
    assert_eq!(load_policy(None).unwrap(), DiffPolicy::default());
}

#[test]
fn test_partial_settings_file_keeps_other_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mirror.json");
    std::fs::write(&path, r#"{ "command_file": ".run", "temp_suffixes": [".swp", "~"] }"#).unwrap();

    let policy = load_policy(Some(&path)).unwrap();
    assert_eq!(policy.command_file, ".run");
    assert!(policy.is_temp_file("proj/notes.txt~"));
    assert_eq!(
        policy.exclude_temp_on_delete,
        DiffPolicy::default().exclude_temp_on_delete
    );
}

#[test]
fn test_unreadable_or_invalid_settings_are_errors() {
    let dir = TempDir::new().unwrap();
    assert!(load_policy(Some(&dir.path().join("missing.json"))).is_err());

    let path = dir.path().join("bad.json");
    std::fs::write(&path, "not json").unwrap();
    let err = load_policy(Some(&path)).unwrap_err();
    assert!(err.to_string().contains("Failed to parse settings file"));
}

// ============================================================================
// Initial sync
// ============================================================================

#[tokio::test]
async fn test_copy_from_remote_fetches_remote_dir() {
    let dir = TempDir::new().unwrap();
    // The in-memory remote does not write files, so stand in for the copy.
    std::fs::create_dir_all(dir.path().join("proj")).unwrap();
    let remote = MemoryRemote::new();
    let mut session = remote.open_session();

    initial::perform(InitialSync::CopyFromRemote, &mut session, &layout(), dir.path())
        .await
        .unwrap();

    assert_eq!(
        session_ops(&remote),
        vec![RemoteOp::Get {
            remote: "/srv/proj".into(),
            local: dir.path().to_path_buf(),
        }]
    );
}

#[tokio::test]
async fn test_transfer_to_remote_sends_local_dir_to_parent() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("proj")).unwrap();
    let remote = MemoryRemote::new();
    let mut session = remote.open_session();

    initial::perform(InitialSync::TransferToRemote, &mut session, &layout(), dir.path())
        .await
        .unwrap();

    assert_eq!(
        session_ops(&remote),
        vec![RemoteOp::Put {
            local: dir.path().join("proj"),
            remote: "/srv".into(),
        }]
    );
}

#[tokio::test]
async fn test_transfer_without_local_dir_fails_before_touching_remote() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let mut session = remote.open_session();

    let err = initial::perform(InitialSync::TransferToRemote, &mut session, &layout(), dir.path())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("does not exist"));
    assert!(session_ops(&remote).is_empty());
}

#[tokio::test]
async fn test_assume_synced_requires_local_copy() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    let mut session = remote.open_session();

    let err = initial::perform(InitialSync::AssumeSynced, &mut session, &layout(), dir.path())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No local copy"));

    std::fs::create_dir_all(dir.path().join("proj")).unwrap();
    initial::perform(InitialSync::AssumeSynced, &mut session, &layout(), dir.path())
        .await
        .unwrap();
    assert!(session_ops(&remote).is_empty());
}

#[tokio::test]
async fn test_failed_copy_is_reported() {
    let dir = TempDir::new().unwrap();
    let remote = MemoryRemote::new();
    remote.fail_next(OpKind::Get, TransportError::transfer("scp: /srv/proj: No such file"));
    let mut session = remote.open_session();

    let err = initial::perform(InitialSync::CopyFromRemote, &mut session, &layout(), dir.path())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Failed to copy /srv/proj"));
}
