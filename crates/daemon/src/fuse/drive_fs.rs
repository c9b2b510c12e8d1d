//! FUSE filesystem implementation for a remote drive
//!
//! Implements `fuser::Filesystem` on top of [`NodeTree`]. Calls that may
//! touch the network or wait on a download are spawned onto the tokio
//! runtime so a slow file never stalls the kernel channel.

use std::ffi::OsStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use tokio::runtime::Handle;

use crate::vfs::{FsError, NodeAttr, NodeTree, NodeType, WriteOp};

/// FUSE filesystem over a session's node tree
pub struct DriveFs {
    /// Tokio runtime handle for async operations
    rt: Handle,
    tree: Arc<NodeTree>,
    /// Next file handle
    next_fh: AtomicU64,
}

impl DriveFs {
    /// Attributes never change during a mount, but keep the kernel's copy short-lived
    const ATTR_TTL: Duration = Duration::from_secs(1);

    pub fn new(rt: Handle, tree: Arc<NodeTree>) -> Self {
        Self {
            rt,
            tree,
            next_fh: AtomicU64::new(1),
        }
    }

    fn next_handle(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::SeqCst)
    }

    fn refuse(&self, op: WriteOp) -> libc::c_int {
        match self.tree.check_write(op) {
            Err(e) => {
                tracing::debug!(%op, "refused write operation");
                e.errno()
            }
            Ok(()) => libc::EPERM,
        }
    }
}

fn file_type(kind: NodeType) -> FileType {
    match kind {
        NodeType::Directory => FileType::Directory,
        NodeType::RegularFile => FileType::RegularFile,
    }
}

fn make_attr(attr: &NodeAttr) -> FileAttr {
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: attr.crtime,
        kind: file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: attr.blksize,
        flags: 0,
    }
}

/// True when open flags ask for anything beyond reading
fn wants_write(flags: i32) -> bool {
    flags & libc::O_ACCMODE != libc::O_RDONLY || flags & libc::O_TRUNC != 0
}

fn log_failure(op: &'static str, ino: u64, err: &FsError) {
    match err {
        FsError::NotFound(_) | FsError::NotPermitted(_) => {
            tracing::trace!(op, ino, error = %err, "request failed")
        }
        _ => tracing::warn!(op, ino, error = %err, "request failed"),
    }
}

impl Filesystem for DriveFs {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        tracing::info!(root = %self.tree.root().descriptor().id, "FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(name) = name.to_str().map(str::to_string) else {
            reply.error(libc::ENOENT);
            return;
        };
        let tree = self.tree.clone();
        self.rt.spawn(async move {
            match tree.lookup(parent, &name).await {
                Ok(node) => reply.entry(&Self::ATTR_TTL, &make_attr(&node.attr()), 0),
                Err(e) => {
                    log_failure("lookup", parent, &e);
                    reply.error(e.errno())
                }
            }
        });
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.tree.attr(ino) {
            Ok(attr) => reply.attr(&Self::ATTR_TTL, &make_attr(&attr)),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        reply.error(self.refuse(WriteOp::Setattr));
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let tree = self.tree.clone();
        self.rt.spawn(async move {
            let entries = match tree.read_dir_all(ino).await {
                Ok(entries) => entries,
                Err(e) => {
                    log_failure("readdir", ino, &e);
                    reply.error(e.errno());
                    return;
                }
            };

            // Skip to offset and add entries
            for (i, entry) in entries.into_iter().enumerate().skip(offset as usize) {
                if reply.add(entry.ino, (i + 1) as i64, file_type(entry.kind), &entry.name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let fh = self.next_handle();
        let tree = self.tree.clone();
        self.rt.spawn(async move {
            match tree.open(ino, wants_write(flags)).await {
                Ok(()) => reply.opened(fh, 0),
                Err(e) => {
                    log_failure("open", ino, &e);
                    reply.error(e.errno())
                }
            }
        });
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let tree = self.tree.clone();
        self.rt.spawn(async move {
            match tree.read(ino, offset.max(0) as u64, size).await {
                Ok(data) => reply.data(&data),
                Err(e) => {
                    log_failure("read", ino, &e);
                    reply.error(e.errno())
                }
            }
        });
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        tracing::trace!(ino, fh, "flush");
        match self.tree.flush(ino) {
            Ok(()) => reply.ok(),
            Err(e) => {
                log_failure("flush", ino, &e);
                reply.error(e.errno())
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        let tree = self.tree.clone();
        self.rt.spawn(async move {
            match tree.release(ino).await {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let stats = self.tree.statfs();
        reply.statfs(
            stats.blocks,
            0,
            0,
            stats.files,
            0,
            stats.block_size,
            stats.name_max,
            stats.block_size,
        );
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _offset: i64,
        _data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        reply.error(self.refuse(WriteOp::Write));
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        reply.error(self.refuse(WriteOp::Create));
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(self.refuse(WriteOp::Mkdir));
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(self.refuse(WriteOp::Remove));
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(self.refuse(WriteOp::Remove));
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _newparent: u64,
        _newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(self.refuse(WriteOp::Rename));
    }

    // Extended attributes are not supported
    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        reply.error(libc::ENOTSUP);
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _name: &OsStr,
        _size: u32,
        reply: ReplyXattr,
    ) {
        reply.error(libc::ENOTSUP);
    }

    fn listxattr(&mut self, _req: &Request<'_>, _ino: u64, _size: u32, reply: ReplyXattr) {
        reply.error(libc::ENOTSUP);
    }

    fn removexattr(&mut self, _req: &Request<'_>, _ino: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(libc::ENOTSUP);
    }
}
