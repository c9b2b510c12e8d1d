//! FUSE integration for drivefs
//!
//! Exposes a [`Session`](crate::vfs::Session)'s node tree to the kernel.
//!
//! # Architecture
//!
//! - `DriveFs`: `fuser::Filesystem` implementation dispatching onto tokio
//! - `mount`: mounts a session read-only in the background

mod drive_fs;
mod mount;

pub use drive_fs::DriveFs;
pub use mount::{current_owner, mount, mount_options};
