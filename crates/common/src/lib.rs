//! Shared types for drivefs
//!
//! The `remote` module defines the narrow capability contract the virtual
//! filesystem needs from a cloud drive (list children, fetch metadata,
//! stream content), together with a Google Drive v2 client and an
//! in-memory implementation for tests and offline use.

pub mod remote;

pub use remote::{
    ContentStream, DriveRemote, FileDescriptor, ListPage, MemoryRemote, OAuthClient, RemoteAccess,
    RemoteError,
};
