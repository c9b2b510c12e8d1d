//! Checks on the FUSE adapter that do not need a real mount

#![cfg(feature = "fuse")]

use std::sync::Arc;

use common::remote::MEMORY_ROOT_ID;
use common::MemoryRemote;
use drivefs_daemon::fuse::{current_owner, mount_options, DriveFs};
use drivefs_daemon::{FsError, Session, SessionConfig};
use fuser::MountOption;
use tempfile::TempDir;

#[test]
fn test_mount_options_are_read_only() {
    let options = mount_options();
    assert!(options.contains(&MountOption::RO));
    assert!(options.contains(&MountOption::DefaultPermissions));
    assert!(!options.contains(&MountOption::RW));
}

#[test]
fn test_errno_mapping() {
    assert_eq!(FsError::NotFound("x".into()).errno(), libc::ENOENT);
    assert_eq!(FsError::UnknownInode(9).errno(), libc::ENOENT);
    assert_eq!(
        FsError::NotPermitted(drivefs_daemon::vfs::WriteOp::Rename).errno(),
        libc::EPERM
    );
}

#[tokio::test]
async fn test_filesystem_wraps_session_tree() {
    let dir = TempDir::new().unwrap();
    let memory = Arc::new(MemoryRemote::new());
    memory.add_file(MEMORY_ROOT_ID, "a.txt", &b"a"[..]);

    let mut config = SessionConfig::new(dir.path());
    config.owner = current_owner();
    let session = Session::start(memory, config).await.unwrap();

    // Construction needs only a runtime handle and the tree
    let _fs = DriveFs::new(tokio::runtime::Handle::current(), session.tree().clone());
    let root = session.tree().attr(1).unwrap();
    assert_eq!(root.uid, current_owner().uid);

    session.shutdown().await;
}

#[tokio::test]
async fn test_flush_succeeds_on_open_files() {
    let dir = TempDir::new().unwrap();
    let memory = Arc::new(MemoryRemote::new());
    memory.add_file(MEMORY_ROOT_ID, "a.txt", &b"abc"[..]);

    let mut config = SessionConfig::new(dir.path());
    config.owner = current_owner();
    let session = Session::start(memory, config).await.unwrap();
    let tree = session.tree().clone();

    let file = tree.lookup(1, "a.txt").await.unwrap();
    tree.open(file.ino(), false).await.unwrap();
    // close(2) flushes before releasing; a read-only file has nothing to write
    tree.flush(file.ino()).unwrap();
    tree.flush(1).unwrap();
    tree.release(file.ino()).await.unwrap();

    let err = tree.flush(999).unwrap_err();
    assert!(matches!(err, FsError::UnknownInode(999)));
    assert_eq!(err.errno(), libc::ENOENT);

    session.shutdown().await;
}
