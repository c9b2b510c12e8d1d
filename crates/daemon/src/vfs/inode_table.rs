//! Inode allocation and lookup
//!
//! FUSE identifies files by 64-bit inode numbers. Every node created while
//! mirroring the drive gets the next number and stays registered for the
//! life of the mount, so numbers are never reused.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::node::{Node, NodeType};

/// Mapping from inode number to node
#[derive(Debug)]
pub struct InodeTable {
    nodes: RwLock<HashMap<u64, Arc<Node>>>,
    /// Next inode number to hand out (starts at the root inode)
    next_inode: AtomicU64,
    /// Sum of the sizes of all registered files
    total_bytes: AtomicU64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Root inode number (always 1 in FUSE)
    pub const ROOT_INODE: u64 = 1;

    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            next_inode: AtomicU64::new(Self::ROOT_INODE),
            total_bytes: AtomicU64::new(0),
        }
    }

    /// Reserve the next inode number; the first call returns the root inode
    pub fn allocate(&self) -> u64 {
        self.next_inode.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a node under its inode number
    pub fn insert(&self, node: Arc<Node>) {
        if node.node_type() == NodeType::RegularFile {
            self.total_bytes
                .fetch_add(node.attr().size, Ordering::Relaxed);
        }
        self.nodes.write().insert(node.ino(), node);
    }

    pub fn get(&self, ino: u64) -> Option<Arc<Node>> {
        self.nodes.read().get(&ino).cloned()
    }

    /// Number of registered nodes
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Weak;

    use common::FileDescriptor;

    use crate::vfs::fetcher::{FetchOptions, Fetcher};
    use crate::vfs::node::Owner;
    use crate::vfs::pins::CachePins;

    fn file_node(table: &InodeTable, size: u64) -> Arc<Node> {
        let ino = table.allocate();
        let desc = Arc::new(FileDescriptor {
            id: format!("id-{}", ino),
            title: format!("file-{}", ino),
            mime_type: "text/plain".to_string(),
            file_size: Some(size),
            ..Default::default()
        });
        let fetcher = Fetcher::new(
            desc.clone(),
            std::path::Path::new("/nonexistent"),
            FetchOptions::default(),
            CachePins::new(),
        );
        Node::file(ino, desc, Weak::new(), Owner::default(), fetcher)
    }

    #[test]
    fn test_root_inode_first() {
        let table = InodeTable::new();
        assert_eq!(table.allocate(), InodeTable::ROOT_INODE);
        assert_eq!(table.allocate(), InodeTable::ROOT_INODE + 1);
    }

    #[test]
    fn test_allocate_unique_across_threads() {
        let table = Arc::new(InodeTable::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || (0..250).map(|_| table.allocate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for ino in handle.join().unwrap() {
                assert!(seen.insert(ino), "inode {} handed out twice", ino);
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn test_insert_and_get() {
        let table = InodeTable::new();
        let node = file_node(&table, 10);

        assert!(table.get(node.ino()).is_none());
        table.insert(node.clone());
        assert_eq!(table.get(node.ino()).unwrap().name(), node.name());
        assert!(table.get(999).is_none());
    }

    #[test]
    fn test_stats() {
        let table = InodeTable::new();
        assert!(table.is_empty());

        table.insert(file_node(&table, 1000));
        table.insert(file_node(&table, 24));

        assert_eq!(table.len(), 2);
        assert_eq!(table.total_bytes(), 1024);
    }
}
