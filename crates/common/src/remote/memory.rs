//! In-memory remote drive
//!
//! [`MemoryRemote`] keeps descriptors and file contents in process memory.
//! It pages listings like the real drive does and can be scripted to hold a
//! download partway through, fail it, or cut it short, which makes it the
//! backend of choice for exercising the filesystem without network access.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use tokio::sync::Semaphore;

use super::descriptor::{FileDescriptor, ParentReference, FOLDER_MIME_TYPE};
use super::provider::{ContentStream, ListPage, RemoteAccess, RemoteError};

/// Identifier of the root folder
pub const MEMORY_ROOT_ID: &str = "root";

const CREATED: &str = "2015-03-01T10:00:00.000Z";
const MODIFIED: &str = "2015-03-02T11:30:00.000Z";

/// Holds back the tail of a download until released
#[derive(Debug, Clone)]
pub struct DownloadGate {
    head: usize,
    permits: Arc<Semaphore>,
}

impl DownloadGate {
    /// Let the held-back bytes through
    pub fn release(&self) {
        self.permits.add_permits(1);
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: Vec<FileDescriptor>,
    contents: HashMap<String, Bytes>,
    gates: HashMap<String, DownloadGate>,
    interrupts: HashMap<String, usize>,
    failing: HashSet<String>,
}

/// Remote drive backed by process memory
#[derive(Debug)]
pub struct MemoryRemote {
    root: FileDescriptor,
    state: RwLock<MemoryState>,
    page_size: usize,
    chunk_size: usize,
    next_id: AtomicU64,
    page_requests: AtomicU64,
    downloads: AtomicU64,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            root: FileDescriptor {
                id: MEMORY_ROOT_ID.to_string(),
                title: "My Drive".to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                created_date: Some(CREATED.to_string()),
                modified_date: Some(MODIFIED.to_string()),
                ..Default::default()
            },
            state: RwLock::new(MemoryState::default()),
            page_size: 100,
            chunk_size: 16 * 1024,
            next_id: AtomicU64::new(1),
            page_requests: AtomicU64::new(0),
            downloads: AtomicU64::new(0),
        }
    }

    /// Number of entries returned per listing page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Size of the chunks content streams are cut into
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn root_id(&self) -> &str {
        &self.root.id
    }

    /// Listing pages served so far
    pub fn page_requests(&self) -> u64 {
        self.page_requests.load(Ordering::SeqCst)
    }

    /// Content streams opened so far
    pub fn downloads(&self) -> u64 {
        self.downloads.load(Ordering::SeqCst)
    }

    fn allocate_id(&self) -> String {
        format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn base_descriptor(&self, parent_id: &str, title: &str, mime_type: &str) -> FileDescriptor {
        let id = self.allocate_id();
        FileDescriptor {
            alternate_link: Some(format!("https://drive.example.com/open?id={}", id)),
            id,
            title: title.to_string(),
            mime_type: mime_type.to_string(),
            created_date: Some(CREATED.to_string()),
            modified_date: Some(MODIFIED.to_string()),
            parents: vec![ParentReference {
                id: parent_id.to_string(),
                is_root: parent_id == MEMORY_ROOT_ID,
            }],
            ..Default::default()
        }
    }

    pub fn add_folder(&self, parent_id: &str, title: &str) -> String {
        let desc = self.base_descriptor(parent_id, title, FOLDER_MIME_TYPE);
        let id = desc.id.clone();
        self.insert(desc, None);
        id
    }

    /// Add a regular file; size and checksum are derived from `content`
    pub fn add_file(&self, parent_id: &str, title: &str, content: impl Into<Bytes>) -> String {
        let content = content.into();
        let mut desc = self.base_descriptor(parent_id, title, "application/octet-stream");
        desc.file_size = Some(content.len() as u64);
        desc.md5_checksum = Some(format!("{:x}", md5::compute(&content)));
        desc.download_url = Some(format!("memory://{}", desc.id));
        let id = desc.id.clone();
        self.insert(desc, Some(content));
        id
    }

    /// Add a drive-native document, which has no downloadable content
    pub fn add_native_document(&self, parent_id: &str, title: &str, mime_type: &str) -> String {
        let desc = self.base_descriptor(parent_id, title, mime_type);
        let id = desc.id.clone();
        self.insert(desc, None);
        id
    }

    /// Add an arbitrary descriptor, optionally with content
    pub fn insert(&self, descriptor: FileDescriptor, content: Option<Bytes>) {
        let mut state = self.state.write();
        if let Some(content) = content {
            state.contents.insert(descriptor.id.clone(), content);
        }
        state.entries.push(descriptor);
    }

    /// Modify a stored descriptor in place
    pub fn update(&self, id: &str, f: impl FnOnce(&mut FileDescriptor)) {
        let mut state = self.state.write();
        if let Some(desc) = state.entries.iter_mut().find(|d| d.id == id) {
            f(desc);
        }
    }

    /// Swap the content served for `id`, leaving its descriptor alone
    pub fn replace_content(&self, id: &str, content: impl Into<Bytes>) {
        self.state.write().contents.insert(id.to_string(), content.into());
    }

    /// Serve only the first `head` bytes of `id` until the gate is released
    pub fn gate_download(&self, id: &str, head: usize) -> DownloadGate {
        let gate = DownloadGate {
            head,
            permits: Arc::new(Semaphore::new(0)),
        };
        self.state.write().gates.insert(id.to_string(), gate.clone());
        gate
    }

    /// Serve `after` bytes of `id`, then fail the stream
    ///
    /// Combined with a gate, the failure is held back until the gate opens.
    pub fn interrupt_download(&self, id: &str, after: usize) {
        self.state.write().interrupts.insert(id.to_string(), after);
    }

    /// Refuse to open a content stream for `id`
    pub fn fail_downloads(&self, id: &str) {
        self.state.write().failing.insert(id.to_string());
    }

    fn chunks(&self, data: Bytes) -> Vec<Result<Bytes, RemoteError>> {
        (0..data.len())
            .step_by(self.chunk_size)
            .map(|start| Ok(data.slice(start..(start + self.chunk_size).min(data.len()))))
            .collect()
    }
}

#[async_trait]
impl RemoteAccess for MemoryRemote {
    async fn list_page(
        &self,
        dir_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListPage, RemoteError> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);

        let state = self.state.read();
        let is_folder = dir_id == self.root.id
            || state
                .entries
                .iter()
                .any(|d| d.id == dir_id && d.is_folder());
        if !is_folder {
            return Err(RemoteError::NotFound(dir_id.to_string()));
        }

        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| RemoteError::Status {
                    status: 400,
                    body: format!("invalid page token {}", token),
                })?,
            None => 0,
        };

        let children: Vec<&FileDescriptor> =
            state.entries.iter().filter(|d| d.has_parent(dir_id)).collect();
        let end = (offset + self.page_size).min(children.len());
        let items = children
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|d| (*d).clone())
            .collect();
        let next_page_token = (end < children.len()).then(|| end.to_string());

        Ok(ListPage {
            items,
            next_page_token,
        })
    }

    async fn get_descriptor(&self, file_id: &str) -> Result<FileDescriptor, RemoteError> {
        if file_id == self.root.id {
            return Ok(self.root.clone());
        }
        self.state
            .read()
            .entries
            .iter()
            .find(|d| d.id == file_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))
    }

    async fn get_root_descriptor(&self) -> Result<FileDescriptor, RemoteError> {
        Ok(self.root.clone())
    }

    async fn open_content_stream(
        &self,
        descriptor: &FileDescriptor,
    ) -> Result<ContentStream, RemoteError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);

        let (content, gate, interrupt) = {
            let state = self.state.read();
            if state.failing.contains(&descriptor.id) {
                return Err(RemoteError::Status {
                    status: 500,
                    body: format!("download of {} refused", descriptor.id),
                });
            }
            if descriptor.download_url.is_none() {
                return Err(RemoteError::NotDownloadable(descriptor.id.clone()));
            }
            let content = state
                .contents
                .get(&descriptor.id)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(descriptor.id.clone()))?;
            (
                content,
                state.gates.get(&descriptor.id).cloned(),
                state.interrupts.get(&descriptor.id).copied(),
            )
        };

        let split = match (&gate, interrupt) {
            (_, Some(after)) => after,
            (Some(gate), None) => gate.head,
            (None, None) => content.len(),
        }
        .min(content.len());
        let head = stream::iter(self.chunks(content.slice(..split)));
        if gate.is_none() && interrupt.is_none() {
            return Ok(Box::pin(head));
        }

        let tail = content.slice(split..);
        let rest = stream::once(async move {
            if let Some(gate) = gate {
                let _permit = gate
                    .permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|e| RemoteError::Interrupted(e.to_string()))?;
            }
            if interrupt.is_some() {
                return Err(RemoteError::Interrupted("connection reset".to_string()));
            }
            Ok::<Bytes, RemoteError>(tail)
        })
        .filter(|chunk| {
            let keep = !matches!(chunk, Ok(b) if b.is_empty());
            async move { keep }
        });
        Ok(Box::pin(head.chain(rest)))
    }
}
