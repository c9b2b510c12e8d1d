//! The mirrored node tree
//!
//! [`NodeTree`] answers the filesystem queries: lookup, listing, attributes,
//! and the open/read/release path for files. Directories are listed from the
//! remote the first time they are looked into and never refreshed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use common::{FileDescriptor, RemoteAccess};

use super::error::{FsError, WriteOp};
use super::fetcher::{FetchOptions, Fetcher};
use super::inode_table::InodeTable;
use super::node::{Children, Directory, Node, NodeAttr, NodeType, Owner, BLOCK_SIZE};
use super::pins::CachePins;

/// Longest file name reported through statfs
const NAME_MAX: u32 = 255;

/// Settings applied to every node of a tree
#[derive(Debug, Clone)]
pub struct TreeSettings {
    pub cache_dir: PathBuf,
    pub owner: Owner,
    pub fetch: FetchOptions,
}

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub kind: NodeType,
    pub name: String,
}

/// Filesystem statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub blocks: u64,
    pub files: u64,
    pub block_size: u32,
    pub name_max: u32,
}

#[derive(Debug)]
pub struct NodeTree {
    remote: Arc<dyn RemoteAccess>,
    inodes: InodeTable,
    settings: TreeSettings,
    pins: CachePins,
    root: Arc<Node>,
}

impl NodeTree {
    /// Build a tree whose root directory mirrors `root_descriptor`
    pub fn new(
        remote: Arc<dyn RemoteAccess>,
        root_descriptor: FileDescriptor,
        settings: TreeSettings,
        pins: CachePins,
    ) -> Self {
        let inodes = InodeTable::new();
        let ino = inodes.allocate();
        let root = Node::directory(
            ino,
            Arc::new(root_descriptor),
            std::sync::Weak::new(),
            settings.owner,
        );
        inodes.insert(root.clone());

        Self {
            remote,
            inodes,
            settings,
            pins,
            root,
        }
    }

    /* Getters */

    pub fn root(&self) -> &Arc<Node> {
        &self.root
    }

    pub fn remote(&self) -> &Arc<dyn RemoteAccess> {
        &self.remote
    }

    pub fn pins(&self) -> &CachePins {
        &self.pins
    }

    pub fn get(&self, ino: u64) -> Result<Arc<Node>, FsError> {
        self.inodes.get(ino).ok_or(FsError::UnknownInode(ino))
    }

    /// Attribute snapshot of a node; never touches the remote
    pub fn attr(&self, ino: u64) -> Result<NodeAttr, FsError> {
        Ok(self.get(ino)?.attr())
    }

    pub async fn lookup(&self, parent: u64, name: &str) -> Result<Arc<Node>, FsError> {
        let node = self.get(parent)?;
        let dir = self.populate(&node).await?;
        dir.child(name)
            .await
            .ok_or_else(|| FsError::NotFound(name.to_string()))
    }

    /// Every entry of a directory: "." and ".." first, then the children
    pub async fn read_dir_all(&self, ino: u64) -> Result<Vec<DirEntry>, FsError> {
        let node = self.get(ino)?;
        let dir = self.populate(&node).await?;
        let parent_ino = node.parent().map(|p| p.ino()).unwrap_or(node.ino());

        let children = dir.entries().await;
        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push(DirEntry {
            ino: node.ino(),
            kind: NodeType::Directory,
            name: ".".to_string(),
        });
        entries.push(DirEntry {
            ino: parent_ino,
            kind: NodeType::Directory,
            name: "..".to_string(),
        });
        entries.extend(children.iter().map(|child| DirEntry {
            ino: child.ino(),
            kind: child.node_type(),
            name: child.name().to_string(),
        }));
        Ok(entries)
    }

    /// Open a file for reading; any write access is refused
    pub async fn open(&self, ino: u64, write: bool) -> Result<(), FsError> {
        if write {
            return Err(FsError::NotPermitted(WriteOp::OpenForWrite));
        }
        let node = self.get(ino)?;
        let file = node.as_file().ok_or(FsError::IsADirectory(ino))?;
        file.fetcher().open(&self.remote).await
    }

    pub async fn read(&self, ino: u64, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        let node = self.get(ino)?;
        let file = node.as_file().ok_or(FsError::IsADirectory(ino))?;
        file.fetcher().read(offset, size).await
    }

    pub async fn release(&self, ino: u64) -> Result<(), FsError> {
        let node = self.get(ino)?;
        let file = node.as_file().ok_or(FsError::IsADirectory(ino))?;
        file.fetcher().close().await;
        Ok(())
    }

    /// Nothing is ever written, so a flush only checks the inode is known
    pub fn flush(&self, ino: u64) -> Result<(), FsError> {
        self.get(ino).map(|_| ())
    }

    /// Refuse a mutating operation without touching any state
    pub fn check_write(&self, op: WriteOp) -> Result<(), FsError> {
        Err(FsError::NotPermitted(op))
    }

    pub fn statfs(&self) -> FsStats {
        FsStats {
            blocks: self.inodes.total_bytes() / BLOCK_SIZE as u64,
            files: self.inodes.len() as u64,
            block_size: BLOCK_SIZE,
            name_max: NAME_MAX,
        }
    }

    async fn populate<'a>(&self, node: &'a Arc<Node>) -> Result<&'a Directory, FsError> {
        let dir = node
            .as_directory()
            .ok_or(FsError::NotADirectory(node.ino()))?;
        dir.populate_with(|| self.load_children(node)).await?;
        Ok(dir)
    }

    async fn load_children(&self, dir: &Arc<Node>) -> Result<Children, FsError> {
        let dir_id = dir.descriptor().id.as_str();
        let items = self.remote.list_children(dir_id).await?;

        let mut chosen: BTreeMap<String, FileDescriptor> = BTreeMap::new();
        for desc in items.into_iter().filter(FileDescriptor::is_visible) {
            let title = desc.title.clone();
            let id = desc.id.clone();
            if let Some(previous) = chosen.insert(title.clone(), desc) {
                tracing::warn!(
                    dir_id,
                    %title,
                    kept = %id,
                    replaced = %previous.id,
                    "sibling title collision, keeping the later entry"
                );
            }
        }

        let children: Children = chosen
            .into_iter()
            .map(|(title, desc)| (title, self.build_node(dir, desc)))
            .collect();
        tracing::debug!(dir_id, count = children.len(), "populated directory");
        Ok(children)
    }

    fn build_node(&self, parent: &Arc<Node>, descriptor: FileDescriptor) -> Arc<Node> {
        let ino = self.inodes.allocate();
        let descriptor = Arc::new(descriptor);
        let parent = Arc::downgrade(parent);
        let node = if descriptor.is_folder() {
            Node::directory(ino, descriptor, parent, self.settings.owner)
        } else {
            let fetcher = Fetcher::new(
                descriptor.clone(),
                &self.settings.cache_dir,
                self.settings.fetch.clone(),
                self.pins.clone(),
            );
            Node::file(ino, descriptor, parent, self.settings.owner, fetcher)
        };
        self.inodes.insert(node.clone());
        node
    }
}
