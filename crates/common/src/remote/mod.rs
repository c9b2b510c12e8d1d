//! Remote drive access
//!
//! Everything the filesystem knows about the cloud side goes through
//! [`RemoteAccess`]. [`DriveRemote`] talks to the real service while
//! [`MemoryRemote`] keeps a scripted drive in memory.

mod auth;
mod descriptor;
mod drive;
mod memory;
mod provider;

pub use auth::{AccessToken, OAuthClient, TokenResponse, AUTH_URL, REDIRECT_URL, SCOPE, TOKEN_URL};
pub use descriptor::{
    FileDescriptor, Labels, ParentReference, FOLDER_MIME_TYPE, NATIVE_MIME_PREFIX,
};
pub use drive::{DriveRemote, DRIVE_API_BASE};
pub use memory::{DownloadGate, MemoryRemote, MEMORY_ROOT_ID};
pub use provider::{ContentStream, ListPage, RemoteAccess, RemoteError};
