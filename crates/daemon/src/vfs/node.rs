//! Nodes of the mirrored tree
//!
//! Every node shares a base record (inode, name, remote descriptor, parent
//! link, attribute snapshot) and is either a [`Directory`] with lazily
//! loaded children or a [`File`] backed by a [`Fetcher`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use chrono::DateTime;
use common::FileDescriptor;
use parking_lot::RwLock;

use super::error::FsError;
use super::fetcher::Fetcher;

/// Block size used for attribute and statfs reporting
pub const BLOCK_SIZE: u32 = 512;

const DIR_PERM: u16 = 0o550;
const FILE_PERM: u16 = 0o440;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Directory,
    RegularFile,
}

/// Numeric owner reported for every node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// Attribute snapshot, derived once from the remote descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttr {
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
    pub crtime: SystemTime,
    pub kind: NodeType,
    pub perm: u16,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub blksize: u32,
}

impl NodeAttr {
    fn new(ino: u64, descriptor: &FileDescriptor, kind: NodeType, size: u64, owner: Owner) -> Self {
        let times = NodeTimes::from_descriptor(descriptor);
        let (size, blocks, perm) = match kind {
            NodeType::Directory => (BLOCK_SIZE as u64, 1, DIR_PERM),
            NodeType::RegularFile => (size, size.div_ceil(BLOCK_SIZE as u64), FILE_PERM),
        };

        Self {
            ino,
            size,
            blocks,
            atime: times.atime,
            mtime: times.mtime,
            ctime: times.ctime,
            crtime: times.ctime,
            kind,
            perm,
            nlink: 1,
            uid: owner.uid,
            gid: owner.gid,
            blksize: BLOCK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeTimes {
    atime: SystemTime,
    mtime: SystemTime,
    ctime: SystemTime,
}

impl NodeTimes {
    fn from_descriptor(descriptor: &FileDescriptor) -> Self {
        let id = descriptor.id.as_str();
        let mtime = parse_timestamp(descriptor.modified_date.as_deref(), "modifiedDate", id)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let ctime = parse_timestamp(descriptor.created_date.as_deref(), "createdDate", id)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let atime = parse_timestamp(
            descriptor.last_viewed_by_me_date.as_deref(),
            "lastViewedByMeDate",
            id,
        )
        .unwrap_or(mtime);

        Self {
            atime,
            mtime,
            ctime,
        }
    }
}

fn parse_timestamp(value: Option<&str>, field: &'static str, file_id: &str) -> Option<SystemTime> {
    let value = value.filter(|v| !v.is_empty())?;
    match DateTime::parse_from_rfc3339(value) {
        Ok(parsed) => Some(SystemTime::from(parsed)),
        Err(e) => {
            tracing::warn!(file_id, field, value, error = %e, "malformed remote timestamp");
            None
        }
    }
}

/// Children of a directory, keyed by title
pub type Children = BTreeMap<String, Arc<Node>>;

#[derive(Debug, Default)]
pub struct Directory {
    /// `None` until the first successful population
    children: tokio::sync::RwLock<Option<Children>>,
}

impl Directory {
    /// Load the children with `populate` unless that already succeeded
    ///
    /// Population runs under the write lock, so concurrent callers wait for
    /// one run instead of listing the remote twice. A failed run leaves the
    /// directory unpopulated.
    pub async fn populate_with<F, Fut>(&self, populate: F) -> Result<(), FsError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Children, FsError>>,
    {
        if self.children.read().await.is_some() {
            return Ok(());
        }
        let mut children = self.children.write().await;
        if children.is_none() {
            *children = Some(populate().await?);
        }
        Ok(())
    }

    pub async fn is_populated(&self) -> bool {
        self.children.read().await.is_some()
    }

    pub async fn child(&self, name: &str) -> Option<Arc<Node>> {
        self.children
            .read()
            .await
            .as_ref()
            .and_then(|children| children.get(name).cloned())
    }

    /// Children in map order; empty while unpopulated
    pub async fn entries(&self) -> Vec<Arc<Node>> {
        self.children
            .read()
            .await
            .as_ref()
            .map(|children| children.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct File {
    fetcher: Fetcher,
}

impl File {
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Directory(Directory),
    File(File),
}

#[derive(Debug)]
pub struct Node {
    ino: u64,
    name: String,
    descriptor: Arc<FileDescriptor>,
    parent: Weak<Node>,
    attr: RwLock<NodeAttr>,
    kind: NodeKind,
}

impl Node {
    pub fn directory(
        ino: u64,
        descriptor: Arc<FileDescriptor>,
        parent: Weak<Node>,
        owner: Owner,
    ) -> Arc<Self> {
        let attr = NodeAttr::new(ino, &descriptor, NodeType::Directory, 0, owner);
        Arc::new(Self {
            ino,
            name: descriptor.title.clone(),
            descriptor,
            parent,
            attr: RwLock::new(attr),
            kind: NodeKind::Directory(Directory::default()),
        })
    }

    pub fn file(
        ino: u64,
        descriptor: Arc<FileDescriptor>,
        parent: Weak<Node>,
        owner: Owner,
        fetcher: Fetcher,
    ) -> Arc<Self> {
        let attr = NodeAttr::new(
            ino,
            &descriptor,
            NodeType::RegularFile,
            fetcher.expected_size(),
            owner,
        );
        Arc::new(Self {
            ino,
            name: descriptor.title.clone(),
            descriptor,
            parent,
            attr: RwLock::new(attr),
            kind: NodeKind::File(File { fetcher }),
        })
    }

    /* Getters */

    pub fn ino(&self) -> u64 {
        self.ino
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &FileDescriptor {
        &self.descriptor
    }

    /// Containing directory, `None` for the root
    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.upgrade()
    }

    pub fn attr(&self) -> NodeAttr {
        self.attr.read().clone()
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::Directory(_) => NodeType::Directory,
            NodeKind::File(_) => NodeType::RegularFile,
        }
    }

    pub fn as_directory(&self) -> Option<&Directory> {
        match &self.kind {
            NodeKind::Directory(dir) => Some(dir),
            NodeKind::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&File> {
        match &self.kind {
            NodeKind::File(file) => Some(file),
            NodeKind::Directory(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn descriptor(modified: Option<&str>, created: Option<&str>, viewed: Option<&str>) -> FileDescriptor {
        FileDescriptor {
            id: "f1".to_string(),
            title: "notes.txt".to_string(),
            mime_type: "text/plain".to_string(),
            file_size: Some(1000),
            modified_date: modified.map(str::to_string),
            created_date: created.map(str::to_string),
            last_viewed_by_me_date: viewed.map(str::to_string),
            ..Default::default()
        }
    }

    fn secs(t: SystemTime) -> u64 {
        t.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs()
    }

    #[test]
    fn test_timestamps_parse_rfc3339() {
        let times = NodeTimes::from_descriptor(&descriptor(
            Some("2015-03-02T11:30:00.000Z"),
            Some("2015-03-01T10:00:00.000Z"),
            Some("2015-03-03T00:00:00+01:00"),
        ));
        assert_eq!(secs(times.mtime), 1425295800);
        assert_eq!(secs(times.ctime), 1425204000);
        assert_eq!(secs(times.atime), 1425337200);
    }

    #[test]
    fn test_missing_access_time_uses_mtime() {
        let times = NodeTimes::from_descriptor(&descriptor(
            Some("2015-03-02T11:30:00.000Z"),
            Some("2015-03-01T10:00:00.000Z"),
            None,
        ));
        assert_eq!(times.atime, times.mtime);
    }

    #[test]
    fn test_malformed_timestamps() {
        let times = NodeTimes::from_descriptor(&descriptor(
            Some("yesterday"),
            Some("2015-03-01T10:00:00.000Z"),
            Some("not a date"),
        ));
        assert_eq!(times.mtime, SystemTime::UNIX_EPOCH);
        assert_eq!(times.atime, times.mtime);
        assert_eq!(
            times.ctime,
            SystemTime::UNIX_EPOCH + Duration::from_secs(1425204000)
        );
    }

    #[test]
    fn test_directory_attr() {
        let desc = FileDescriptor {
            id: "d1".to_string(),
            title: "Photos".to_string(),
            mime_type: common::remote::FOLDER_MIME_TYPE.to_string(),
            ..Default::default()
        };
        let owner = Owner { uid: 1000, gid: 100 };
        let node = Node::directory(7, Arc::new(desc), Weak::new(), owner);
        let attr = node.attr();

        assert_eq!(attr.ino, 7);
        assert_eq!(attr.size, 512);
        assert_eq!(attr.blocks, 1);
        assert_eq!(attr.perm, 0o550);
        assert_eq!(attr.kind, NodeType::Directory);
        assert_eq!((attr.uid, attr.gid), (1000, 100));
        assert_eq!(node.name(), "Photos");
        assert!(node.parent().is_none());
    }

    #[test]
    fn test_file_attr() {
        let attr = NodeAttr::new(
            3,
            &descriptor(None, None, None),
            NodeType::RegularFile,
            1000,
            Owner::default(),
        );
        assert_eq!(attr.size, 1000);
        assert_eq!(attr.blocks, 2);
        assert_eq!(attr.perm, 0o440);
        assert_eq!(attr.blksize, 512);
    }

    #[tokio::test]
    async fn test_failed_population_is_retried() {
        let dir = Directory::default();

        let result = dir
            .populate_with(|| async { Err(FsError::NotFound("listing".to_string())) })
            .await;
        assert!(result.is_err());
        assert!(!dir.is_populated().await);

        dir.populate_with(|| async { Ok(Children::new()) })
            .await
            .unwrap();
        assert!(dir.is_populated().await);

        // already populated, the loader is not called again
        dir.populate_with(|| async { Err(FsError::NotFound("populated twice".to_string())) })
            .await
            .unwrap();
    }
}
