//! Per-file download and cache management
//!
//! A [`Fetcher`] owns the cache file of one remote file. The first open
//! starts a background download; later openers join it instead of starting
//! their own. An open returns as soon as the download is *ready* (enough
//! bytes landed, or it finished), and reads past the materialized range wait
//! for the download to catch up.
//!
//! Download progress is published through a `watch` channel, so every
//! waiter sees the same terminal outcome.

use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{FileDescriptor, RemoteAccess};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

use super::error::{DownloadFailure, FsError};
use super::pins::CachePins;

/// What to do when a finished download does not match the remote checksum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// Delete the cache file and fail the download
    #[default]
    Purge,
    /// Log the mismatch and keep serving the content
    Warn,
}

/// Tuning knobs shared by all fetchers of a session
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Bytes that must land before an open returns
    pub readiness_threshold: u64,
    /// Upper bound on how long a blocked read sleeps between progress checks
    pub poll_interval: Duration,
    pub checksum_policy: ChecksumPolicy,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            readiness_threshold: 64 * 1024,
            poll_interval: Duration::from_millis(500),
            checksum_policy: ChecksumPolicy::Purge,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Downloading,
    Complete,
    Failed(DownloadFailure),
}

#[derive(Debug, Clone)]
struct Progress {
    written: u64,
    phase: Phase,
}

impl Progress {
    fn is_ready(&self, threshold: u64) -> bool {
        self.written >= threshold || self.phase != Phase::Downloading
    }
}

#[derive(Debug, Clone)]
struct DownloadSlot {
    generation: u64,
    progress: watch::Receiver<Progress>,
}

#[derive(Debug, Default)]
struct OpenState {
    handle: Option<Arc<std::fs::File>>,
    /// Download generation the handle was opened against
    generation: u64,
    /// Progress of the download that fills the handle's file, if any
    progress: Option<watch::Receiver<Progress>>,
    open_count: usize,
}

impl OpenState {
    fn has_failed(&self) -> bool {
        self.progress
            .as_ref()
            .is_some_and(|rx| matches!(rx.borrow().phase, Phase::Failed(_)))
    }
}

/// Outcome of deciding how an open gets its content
enum Prepared {
    Cached,
    Download {
        generation: u64,
        progress: watch::Receiver<Progress>,
    },
}

/// Cache file owner for one remote file
#[derive(Debug)]
pub struct Fetcher {
    descriptor: Arc<FileDescriptor>,
    local_path: PathBuf,
    expected_size: u64,
    /// Payload written in place of content for native documents
    shortcut: Option<String>,
    options: FetchOptions,
    pins: CachePins,
    state: tokio::sync::Mutex<OpenState>,
    download: parking_lot::Mutex<Option<DownloadSlot>>,
    generations: AtomicU64,
    downloads_started: AtomicU64,
}

impl Fetcher {
    pub fn new(
        descriptor: Arc<FileDescriptor>,
        cache_dir: &Path,
        options: FetchOptions,
        pins: CachePins,
    ) -> Self {
        let shortcut = descriptor
            .is_native_document()
            .then(|| descriptor.shortcut_payload());
        let expected_size = match &shortcut {
            Some(payload) => payload.len() as u64,
            None => descriptor.file_size.unwrap_or(0),
        };

        Self {
            local_path: cache_dir.join(&descriptor.id),
            descriptor,
            expected_size,
            shortcut,
            options,
            pins,
            state: tokio::sync::Mutex::new(OpenState::default()),
            download: parking_lot::Mutex::new(None),
            generations: AtomicU64::new(0),
            downloads_started: AtomicU64::new(0),
        }
    }

    /* Getters */

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Size the cache file has once complete
    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    pub fn is_shortcut(&self) -> bool {
        self.shortcut.is_some()
    }

    pub async fn open_count(&self) -> usize {
        self.state.lock().await.open_count
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.handle.is_some()
    }

    /// Background downloads started over this fetcher's lifetime
    pub fn downloads_started(&self) -> u64 {
        self.downloads_started.load(Ordering::SeqCst)
    }

    fn cache_name(&self) -> &str {
        &self.descriptor.id
    }

    async fn is_cache_complete(&self) -> bool {
        tokio::fs::metadata(&self.local_path)
            .await
            .map(|m| m.is_file() && m.len() == self.expected_size)
            .unwrap_or(false)
    }

    /// Make the content available locally and take one open reference
    pub async fn open(&self, remote: &Arc<dyn RemoteAccess>) -> Result<(), FsError> {
        self.pins.pin(self.cache_name());
        match self.open_pinned(remote).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.pins.unpin(self.cache_name());
                Err(e)
            }
        }
    }

    async fn open_pinned(&self, remote: &Arc<dyn RemoteAccess>) -> Result<(), FsError> {
        let (generation, progress) = match self.prepare(remote).await? {
            Prepared::Cached => (self.current_generation(), None),
            Prepared::Download {
                generation,
                mut progress,
            } => {
                let threshold = self.options.readiness_threshold;
                let outcome = progress
                    .wait_for(|p| p.is_ready(threshold))
                    .await
                    .map(|p| p.clone());
                let Ok(ready) = outcome else {
                    return Err(self.abandoned());
                };
                if let Phase::Failed(failure) = ready.phase {
                    self.drop_failed_handle(generation).await;
                    return Err(FsError::Download {
                        id: self.descriptor.id.clone(),
                        failure,
                    });
                }
                (generation, Some(progress))
            }
        };

        let mut state = self.state.lock().await;
        if state.handle.is_none() || state.generation != generation || state.has_failed() {
            let file = tokio::fs::File::open(&self.local_path).await?;
            state.handle = Some(Arc::new(file.into_std().await));
            state.generation = generation;
            state.progress = progress;
        }
        state.open_count += 1;
        tracing::debug!(
            file_id = %self.descriptor.id,
            open_count = state.open_count,
            "opened cache file"
        );
        Ok(())
    }

    /// Forget a handle whose download failed so no later open reuses it
    ///
    /// The failed progress stays behind, so reads through still-open
    /// references keep reporting the failure.
    async fn drop_failed_handle(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if state.generation == generation && state.handle.take().is_some() {
            tracing::debug!(file_id = %self.descriptor.id, generation, "dropped handle of failed download");
        }
    }

    /// Join a live download, accept a complete cache file, or start fetching
    ///
    /// Filesystem work happens before the slot lock is taken; the lock only
    /// guards claiming the slot.
    async fn prepare(&self, remote: &Arc<dyn RemoteAccess>) -> Result<Prepared, FsError> {
        let seen = {
            let slot = self.download.lock();
            if let Some(live) = slot.as_ref().and_then(|s| self.join(s)) {
                return Ok(live);
            }
            slot.as_ref().map(|s| s.generation).unwrap_or(0)
        };

        if self.is_cache_complete().await {
            return Ok(Prepared::Cached);
        }

        if let Some(payload) = &self.shortcut {
            tracing::debug!(file_id = %self.descriptor.id, "writing shortcut");
            tokio::fs::write(&self.local_path, payload).await?;
            return Ok(Prepared::Cached);
        }

        Ok(self.claim(remote, seen))
    }

    fn join(&self, slot: &DownloadSlot) -> Option<Prepared> {
        if slot.progress.borrow().phase != Phase::Downloading {
            return None;
        }
        tracing::debug!(file_id = %self.descriptor.id, "joining running download");
        Some(Prepared::Download {
            generation: slot.generation,
            progress: slot.progress.clone(),
        })
    }

    /// Start a download unless another opener got there since `seen`
    fn claim(&self, remote: &Arc<dyn RemoteAccess>, seen: u64) -> Prepared {
        let mut slot = self.download.lock();
        if let Some(current) = slot.as_ref() {
            if let Some(live) = self.join(current) {
                return live;
            }
            if current.generation != seen && current.progress.borrow().phase == Phase::Complete {
                return Prepared::Cached;
            }
        }

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = watch::channel(Progress {
            written: 0,
            phase: Phase::Downloading,
        });
        *slot = Some(DownloadSlot {
            generation,
            progress: rx.clone(),
        });
        self.downloads_started.fetch_add(1, Ordering::SeqCst);

        self.pins.pin(self.cache_name());
        let job = DownloadJob {
            remote: remote.clone(),
            descriptor: self.descriptor.clone(),
            path: self.local_path.clone(),
            policy: self.options.checksum_policy,
            pins: self.pins.clone(),
        };
        tracing::info!(
            file_id = %self.descriptor.id,
            title = %self.descriptor.title,
            generation,
            "starting download"
        );
        tokio::spawn(job.run(tx));

        Prepared::Download {
            generation,
            progress: rx,
        }
    }

    fn current_generation(&self) -> u64 {
        self.download
            .lock()
            .as_ref()
            .map(|s| s.generation)
            .unwrap_or(0)
    }

    fn abandoned(&self) -> FsError {
        FsError::Download {
            id: self.descriptor.id.clone(),
            failure: DownloadFailure::Remote("download task ended without a result".to_string()),
        }
    }

    /// Read up to `size` bytes at `offset`, waiting for the range to land
    ///
    /// Progress is tracked per handle, so a reference opened against a
    /// download that later failed keeps failing even after a newer download
    /// has taken over the slot.
    pub async fn read(&self, offset: u64, size: u32) -> Result<Vec<u8>, FsError> {
        let (handle, progress) = {
            let state = self.state.lock().await;
            if state.open_count == 0 {
                return Err(FsError::NotOpen);
            }
            (state.handle.clone(), state.progress.clone())
        };

        let target = offset.saturating_add(size as u64).min(self.expected_size);
        if let Some(rx) = progress {
            self.wait_for_range(rx, target).await?;
        }
        let handle = handle.ok_or(FsError::NotOpen)?;

        let data = tokio::task::spawn_blocking(move || read_range(&handle, offset, size as usize))
            .await
            .map_err(io::Error::other)??;
        Ok(data)
    }

    async fn wait_for_range(
        &self,
        mut rx: watch::Receiver<Progress>,
        target: u64,
    ) -> Result<(), FsError> {
        loop {
            let progress = rx.borrow_and_update().clone();
            match progress.phase {
                Phase::Complete => return Ok(()),
                Phase::Failed(failure) => {
                    return Err(FsError::Download {
                        id: self.descriptor.id.clone(),
                        failure,
                    })
                }
                Phase::Downloading if progress.written >= target => return Ok(()),
                Phase::Downloading => {}
            }

            tracing::trace!(
                file_id = %self.descriptor.id,
                written = progress.written,
                target,
                "waiting for download"
            );
            match tokio::time::timeout(self.options.poll_interval, rx.changed()).await {
                Ok(Ok(())) | Err(_) => continue,
                Ok(Err(_)) => return Err(self.abandoned()),
            }
        }
    }

    /// Drop one open reference, closing the handle on the last one
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.open_count == 0 {
            tracing::warn!(file_id = %self.descriptor.id, "close without matching open");
            return;
        }
        state.open_count -= 1;
        if state.open_count == 0 {
            state.handle = None;
            state.progress = None;
            tracing::debug!(file_id = %self.descriptor.id, "closed cache file");
        }
        drop(state);
        self.pins.unpin(self.cache_name());
    }
}

fn read_range(file: &std::fs::File, offset: u64, size: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Everything a background download needs, detached from the fetcher
struct DownloadJob {
    remote: Arc<dyn RemoteAccess>,
    descriptor: Arc<FileDescriptor>,
    path: PathBuf,
    policy: ChecksumPolicy,
    pins: CachePins,
}

impl DownloadJob {
    async fn run(self, tx: watch::Sender<Progress>) {
        let phase = match self.fetch(&tx).await {
            Ok(()) => {
                tracing::info!(
                    file_id = %self.descriptor.id,
                    bytes = tx.borrow().written,
                    "download complete"
                );
                Phase::Complete
            }
            Err(failure) => {
                tracing::warn!(file_id = %self.descriptor.id, %failure, "download failed");
                Phase::Failed(failure)
            }
        };
        // openers still waiting hold pins of their own
        self.pins.unpin(&self.descriptor.id);
        tx.send_modify(|p| p.phase = phase);
    }

    async fn fetch(&self, tx: &watch::Sender<Progress>) -> Result<(), DownloadFailure> {
        let remote_err = |e: common::RemoteError| DownloadFailure::Remote(e.to_string());
        let io_err = |e: io::Error| DownloadFailure::Io(e.to_string());

        let mut stream = self
            .remote
            .open_content_stream(&self.descriptor)
            .await
            .map_err(remote_err)?;
        let mut file = tokio::fs::File::create(&self.path).await.map_err(io_err)?;
        let mut hasher = md5::Context::new();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(remote_err)?;
            file.write_all(&chunk).await.map_err(io_err)?;
            file.flush().await.map_err(io_err)?;
            hasher.consume(&chunk);
            written += chunk.len() as u64;
            tx.send_modify(|p| p.written = written);
        }
        drop(file);

        let Some(expected) = self.descriptor.md5_checksum.as_deref() else {
            return Ok(());
        };
        let actual = format!("{:x}", hasher.compute());
        if actual.eq_ignore_ascii_case(expected) {
            return Ok(());
        }

        match self.policy {
            ChecksumPolicy::Warn => {
                tracing::warn!(
                    file_id = %self.descriptor.id,
                    expected,
                    actual = %actual,
                    "checksum mismatch, keeping cached content"
                );
                Ok(())
            }
            ChecksumPolicy::Purge => {
                if let Err(e) = tokio::fs::remove_file(&self.path).await {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to purge cache file");
                }
                Err(DownloadFailure::Integrity {
                    expected: expected.to_string(),
                    actual,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::remote::MEMORY_ROOT_ID;
    use common::MemoryRemote;
    use tempfile::TempDir;

    fn options() -> FetchOptions {
        FetchOptions {
            readiness_threshold: 8,
            poll_interval: Duration::from_millis(20),
            checksum_policy: ChecksumPolicy::Purge,
        }
    }

    async fn fetcher_for(
        remote: &MemoryRemote,
        id: &str,
        dir: &TempDir,
        options: FetchOptions,
        pins: &CachePins,
    ) -> Fetcher {
        let desc = remote.get_descriptor(id).await.unwrap();
        Fetcher::new(Arc::new(desc), dir.path(), options, pins.clone())
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_open_count_lifecycle() {
        let dir = TempDir::new().unwrap();
        let pins = CachePins::new();
        let memory = Arc::new(MemoryRemote::new());
        let id = memory.add_file(MEMORY_ROOT_ID, "a.txt", &b"hello world"[..]);
        let fetcher = fetcher_for(&memory, &id, &dir, FetchOptions::default(), &pins).await;
        let remote: Arc<dyn RemoteAccess> = memory.clone();

        fetcher.open(&remote).await.unwrap();
        fetcher.open(&remote).await.unwrap();
        assert_eq!(fetcher.open_count().await, 2);
        assert!(fetcher.is_open().await);
        assert!(pins.is_pinned(&id));

        assert_eq!(fetcher.read(6, 100).await.unwrap(), b"world");

        fetcher.close().await;
        assert_eq!(fetcher.open_count().await, 1);
        assert!(fetcher.is_open().await);

        fetcher.close().await;
        assert_eq!(fetcher.open_count().await, 0);
        assert!(!fetcher.is_open().await);
        assert!(!pins.is_pinned(&id));
        assert!(fetcher.local_path().exists());

        assert!(matches!(fetcher.read(0, 4).await, Err(FsError::NotOpen)));
    }

    #[tokio::test]
    async fn test_read_before_open() {
        let dir = TempDir::new().unwrap();
        let memory = MemoryRemote::new();
        let id = memory.add_file(MEMORY_ROOT_ID, "a.txt", &b"abc"[..]);
        let fetcher = fetcher_for(&memory, &id, &dir, options(), &CachePins::new()).await;

        assert!(matches!(fetcher.read(0, 3).await, Err(FsError::NotOpen)));
        assert_eq!(memory.downloads(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_openers_share_download() {
        let dir = TempDir::new().unwrap();
        let pins = CachePins::new();
        let memory = Arc::new(MemoryRemote::new().with_chunk_size(4));
        let content = pattern(64);
        let id = memory.add_file(MEMORY_ROOT_ID, "shared.bin", content.clone());
        let gate = memory.gate_download(&id, 0);
        let fetcher = Arc::new(fetcher_for(&memory, &id, &dir, options(), &pins).await);
        let remote: Arc<dyn RemoteAccess> = memory.clone();

        let openers: Vec<_> = (0..2)
            .map(|_| {
                let fetcher = fetcher.clone();
                let remote = remote.clone();
                tokio::spawn(async move { fetcher.open(&remote).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.release();
        for opener in openers {
            opener.await.unwrap().unwrap();
        }

        assert_eq!(memory.downloads(), 1);
        assert_eq!(fetcher.downloads_started(), 1);
        assert_eq!(fetcher.open_count().await, 2);
        assert_eq!(fetcher.read(0, 64).await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_failed_download_reaches_all_openers() {
        let dir = TempDir::new().unwrap();
        let pins = CachePins::new();
        let memory = Arc::new(MemoryRemote::new());
        let id = memory.add_file(MEMORY_ROOT_ID, "broken.bin", pattern(32));
        let gate = memory.gate_download(&id, 0);
        memory.interrupt_download(&id, 0);
        let fetcher = Arc::new(fetcher_for(&memory, &id, &dir, options(), &pins).await);
        let remote: Arc<dyn RemoteAccess> = memory.clone();

        let openers: Vec<_> = (0..2)
            .map(|_| {
                let fetcher = fetcher.clone();
                let remote = remote.clone();
                tokio::spawn(async move { fetcher.open(&remote).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.release();
        for opener in openers {
            let err = opener.await.unwrap().unwrap_err();
            assert!(matches!(
                err,
                FsError::Download {
                    failure: DownloadFailure::Remote(_),
                    ..
                }
            ));
        }

        assert_eq!(memory.downloads(), 1);
        assert_eq!(fetcher.open_count().await, 0);
        assert!(!pins.is_pinned(&id));
    }

    #[tokio::test]
    async fn test_read_waits_for_range() {
        let dir = TempDir::new().unwrap();
        let pins = CachePins::new();
        let memory = Arc::new(MemoryRemote::new().with_chunk_size(8));
        let content = pattern(64);
        let id = memory.add_file(MEMORY_ROOT_ID, "slow.bin", content.clone());
        let gate = memory.gate_download(&id, 16);
        let fetcher = Arc::new(fetcher_for(&memory, &id, &dir, options(), &pins).await);
        let remote: Arc<dyn RemoteAccess> = memory.clone();

        fetcher.open(&remote).await.unwrap();
        assert_eq!(fetcher.read(0, 8).await.unwrap(), &content[..8]);

        let pending = {
            let fetcher = fetcher.clone();
            tokio::spawn(async move { fetcher.read(32, 16).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!pending.is_finished());

        gate.release();
        let data = pending.await.unwrap().unwrap();
        assert_eq!(data, &content[32..48]);

        // short read at end of file
        assert_eq!(fetcher.read(60, 16).await.unwrap(), &content[60..]);
    }

    #[tokio::test]
    async fn test_native_document_writes_shortcut() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryRemote::new());
        let id = memory.add_native_document(
            MEMORY_ROOT_ID,
            "Plan",
            "application/vnd.google-apps.document",
        );
        let fetcher = fetcher_for(&memory, &id, &dir, options(), &CachePins::new()).await;
        let remote: Arc<dyn RemoteAccess> = memory.clone();

        assert!(fetcher.is_shortcut());
        fetcher.open(&remote).await.unwrap();

        let data = fetcher.read(0, 4096).await.unwrap();
        let text = String::from_utf8(data).unwrap();
        assert!(text.starts_with("[Desktop Entry]\n"));
        assert!(text.contains("Name=Plan\n"));
        assert_eq!(text.len() as u64, fetcher.expected_size());
        assert_eq!(memory.downloads(), 0);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_purges() {
        let dir = TempDir::new().unwrap();
        let pins = CachePins::new();
        let memory = Arc::new(MemoryRemote::new());
        let id = memory.add_file(MEMORY_ROOT_ID, "bad.bin", &b"tampered"[..]);
        memory.update(&id, |d| d.md5_checksum = Some("0".repeat(32)));
        let fetcher = fetcher_for(&memory, &id, &dir, FetchOptions::default(), &pins).await;
        let remote: Arc<dyn RemoteAccess> = memory.clone();

        let err = fetcher.open(&remote).await.unwrap_err();
        assert!(matches!(
            err,
            FsError::Download {
                failure: DownloadFailure::Integrity { .. },
                ..
            }
        ));
        assert!(!fetcher.local_path().exists());
        assert_eq!(fetcher.open_count().await, 0);

        // the next open tries again
        assert!(fetcher.open(&remote).await.is_err());
        assert_eq!(memory.downloads(), 2);
    }

    #[tokio::test]
    async fn test_stale_handle_never_serves_purged_content() {
        let dir = TempDir::new().unwrap();
        let pins = CachePins::new();
        let memory = Arc::new(MemoryRemote::new().with_chunk_size(4));
        let id = memory.add_file(MEMORY_ROOT_ID, "bad.bin", pattern(64));
        memory.update(&id, |d| d.md5_checksum = Some("0".repeat(32)));
        let first = memory.gate_download(&id, 16);
        let fetcher = Arc::new(fetcher_for(&memory, &id, &dir, options(), &pins).await);
        let remote: Arc<dyn RemoteAccess> = memory.clone();

        // ready after the first 16 bytes, before the checksum is known
        fetcher.open(&remote).await.unwrap();
        first.release();
        let is_integrity = |r: Result<Vec<u8>, FsError>| {
            matches!(
                r,
                Err(FsError::Download {
                    failure: DownloadFailure::Integrity { .. },
                    ..
                })
            )
        };
        assert!(is_integrity(fetcher.read(0, 64).await));
        assert!(!fetcher.local_path().exists());

        // a second opener starts a fresh download that stays pending
        let second = memory.gate_download(&id, 0);
        let opener = {
            let fetcher = fetcher.clone();
            let remote = remote.clone();
            tokio::spawn(async move { fetcher.open(&remote).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!opener.is_finished());
        assert_eq!(fetcher.downloads_started(), 2);

        assert!(is_integrity(fetcher.read(0, 64).await));
        assert!(is_integrity(fetcher.read(0, 16).await));

        second.release();
        assert!(opener.await.unwrap().is_err());
        assert!(is_integrity(fetcher.read(0, 64).await));
        assert_eq!(fetcher.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_open_after_failure_reopens_handle() {
        let dir = TempDir::new().unwrap();
        let pins = CachePins::new();
        let memory = Arc::new(MemoryRemote::new().with_chunk_size(4));
        let content = pattern(32);
        let id = memory.add_file(MEMORY_ROOT_ID, "flaky.bin", content.clone());
        memory.replace_content(&id, vec![0u8; 32]);
        let gate = memory.gate_download(&id, 8);
        let fetcher = fetcher_for(&memory, &id, &dir, options(), &pins).await;
        let remote: Arc<dyn RemoteAccess> = memory.clone();

        fetcher.open(&remote).await.unwrap();
        gate.release();
        assert!(fetcher.read(0, 32).await.is_err());

        // the remote copy is fixed; the next open must not reuse the purged handle
        memory.replace_content(&id, content.clone());
        fetcher.open(&remote).await.unwrap();
        assert_eq!(fetcher.open_count().await, 2);
        assert_eq!(fetcher.read(0, 32).await.unwrap(), content);
        assert_eq!(fetcher.downloads_started(), 2);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_warns() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryRemote::new());
        let id = memory.add_file(MEMORY_ROOT_ID, "bad.bin", &b"tampered"[..]);
        memory.update(&id, |d| d.md5_checksum = Some("0".repeat(32)));
        let options = FetchOptions {
            checksum_policy: ChecksumPolicy::Warn,
            ..FetchOptions::default()
        };
        let fetcher = fetcher_for(&memory, &id, &dir, options, &CachePins::new()).await;
        let remote: Arc<dyn RemoteAccess> = memory.clone();

        fetcher.open(&remote).await.unwrap();
        assert_eq!(fetcher.read(0, 64).await.unwrap(), b"tampered");
    }

    #[tokio::test]
    async fn test_complete_cache_skips_download() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryRemote::new());
        let id = memory.add_file(MEMORY_ROOT_ID, "cached.txt", &b"cached!"[..]);
        std::fs::write(dir.path().join(&id), b"cached!").unwrap();
        let fetcher = fetcher_for(&memory, &id, &dir, options(), &CachePins::new()).await;
        let remote: Arc<dyn RemoteAccess> = memory.clone();

        fetcher.open(&remote).await.unwrap();
        assert_eq!(fetcher.read(0, 7).await.unwrap(), b"cached!");
        assert_eq!(memory.downloads(), 0);
    }

    #[tokio::test]
    async fn test_incomplete_cache_downloads_again() {
        let dir = TempDir::new().unwrap();
        let memory = Arc::new(MemoryRemote::new());
        let id = memory.add_file(MEMORY_ROOT_ID, "partial.txt", &b"full content"[..]);
        std::fs::write(dir.path().join(&id), b"full").unwrap();
        let fetcher = fetcher_for(&memory, &id, &dir, options(), &CachePins::new()).await;
        let remote: Arc<dyn RemoteAccess> = memory.clone();

        fetcher.open(&remote).await.unwrap();
        assert_eq!(fetcher.read(0, 64).await.unwrap(), b"full content");
        assert_eq!(memory.downloads(), 1);
    }
}
