use std::fmt;

use common::RemoteError;

/// Mutating operations, all refused on this filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Mkdir,
    Rename,
    Remove,
    Setattr,
    Write,
    OpenForWrite,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteOp::Create => "create",
            WriteOp::Mkdir => "mkdir",
            WriteOp::Rename => "rename",
            WriteOp::Remove => "remove",
            WriteOp::Setattr => "setattr",
            WriteOp::Write => "write",
            WriteOp::OpenForWrite => "open for write",
        };
        f.write_str(name)
    }
}

/// Why a background download did not produce a usable cache file
///
/// Cloned into every reader waiting on the download, so it carries
/// rendered messages rather than the source errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadFailure {
    #[error("remote error: {0}")]
    Remote(String),
    #[error("local storage error: {0}")]
    Io(String),
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },
}

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("no such entry: {0}")]
    NotFound(String),
    #[error("unknown inode {0}")]
    UnknownInode(u64),
    #[error("inode {0} is not a directory")]
    NotADirectory(u64),
    #[error("inode {0} is a directory")]
    IsADirectory(u64),
    #[error("{0} not permitted on a read-only filesystem")]
    NotPermitted(WriteOp),
    #[error("file is not open")]
    NotOpen,
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("local storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("download of {id} failed: {failure}")]
    Download { id: String, failure: DownloadFailure },
}

#[cfg(feature = "fuse")]
impl FsError {
    /// Errno reported to the kernel
    pub fn errno(&self) -> libc::c_int {
        match self {
            FsError::NotFound(_) | FsError::UnknownInode(_) => libc::ENOENT,
            FsError::NotADirectory(_) => libc::ENOTDIR,
            FsError::IsADirectory(_) => libc::EISDIR,
            FsError::NotPermitted(_) => libc::EPERM,
            FsError::NotOpen => libc::EBADF,
            FsError::Remote(_) | FsError::Io(_) | FsError::Download { .. } => libc::EIO,
        }
    }
}

#[cfg(all(test, feature = "fuse"))]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(FsError::NotFound("x".into()).errno(), libc::ENOENT);
        assert_eq!(FsError::UnknownInode(9).errno(), libc::ENOENT);
        assert_eq!(FsError::NotADirectory(2).errno(), libc::ENOTDIR);
        assert_eq!(FsError::IsADirectory(1).errno(), libc::EISDIR);
        assert_eq!(FsError::NotPermitted(WriteOp::Mkdir).errno(), libc::EPERM);
        assert_eq!(FsError::NotOpen.errno(), libc::EBADF);
        assert_eq!(
            FsError::Download {
                id: "a".into(),
                failure: DownloadFailure::Integrity {
                    expected: "00".into(),
                    actual: "ff".into(),
                },
            }
            .errno(),
            libc::EIO
        );
        assert_eq!(
            FsError::Remote(RemoteError::NotFound("a".into())).errno(),
            libc::EIO
        );
    }
}
