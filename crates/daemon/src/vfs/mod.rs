//! Read-only view of a remote drive
//!
//! # Architecture
//!
//! - `NodeTree`: directories and files mirroring the remote, listed lazily
//! - `Fetcher`: per-file cache file with a single background download
//! - `InodeTable`: inode allocation and lookup
//! - `CacheReaper`: periodic eviction of idle cache files
//! - `Session`: the mount lifecycle tying the pieces together
//!
//! Nothing here depends on FUSE; the kernel adapter lives in `crate::fuse`.

mod error;
mod fetcher;
mod inode_table;
mod node;
mod pins;
mod reaper;
mod session;
mod tree;

pub use error::{DownloadFailure, FsError, WriteOp};
pub use fetcher::{ChecksumPolicy, FetchOptions, Fetcher};
pub use inode_table::InodeTable;
pub use node::{Directory, File, Node, NodeAttr, NodeKind, NodeType, Owner, BLOCK_SIZE};
pub use pins::CachePins;
pub use reaper::{CacheReaper, ReaperHandle, SweepStats};
pub use session::{Session, SessionConfig};
pub use tree::{DirEntry, FsStats, NodeTree, TreeSettings};
