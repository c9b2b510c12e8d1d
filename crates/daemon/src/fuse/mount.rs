use std::path::Path;

use fuser::{BackgroundSession, MountOption};
use tokio::runtime::Handle;

use crate::vfs::{Owner, Session};

use super::DriveFs;

/// Options every drivefs mount uses
pub fn mount_options() -> Vec<MountOption> {
    vec![
        MountOption::RO,
        MountOption::FSName("drivefs".to_string()),
        MountOption::Subtype("googledrivefs".to_string()),
        MountOption::DefaultPermissions,
    ]
}

/// uid/gid of the mounting user
pub fn current_owner() -> Owner {
    Owner {
        uid: unsafe { libc::getuid() },
        gid: unsafe { libc::getgid() },
    }
}

/// Mount `session` at `mountpoint` on a background thread
///
/// Must be called from within a tokio runtime. Dropping the returned
/// session unmounts.
pub fn mount(session: &Session, mountpoint: &Path) -> std::io::Result<BackgroundSession> {
    let fs = DriveFs::new(Handle::current(), session.tree().clone());
    tracing::info!(mountpoint = %mountpoint.display(), "mounting drive");
    fuser::spawn_mount2(fs, mountpoint, &mount_options())
}
