//! Registry of cache files that must not be evicted
//!
//! A fetcher pins its cache file for every logical open and for as long as a
//! download is writing to it. The reaper checks the registry and deletes
//! under the same lock, so a file cannot be pinned between the check and the
//! removal.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Default)]
pub struct CachePins {
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl CachePins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(&self, name: &str) {
        *self.counts.lock().entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn unpin(&self, name: &str) {
        let mut counts = self.counts.lock();
        match counts.get_mut(name) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                counts.remove(name);
            }
            None => tracing::warn!(name, "unpin of a cache file that is not pinned"),
        }
    }

    pub fn is_pinned(&self, name: &str) -> bool {
        self.counts.lock().contains_key(name)
    }

    /// Delete `path` unless `name` is pinned
    ///
    /// Returns `Ok(false)` when the file was pinned and left alone.
    pub fn remove_if_unpinned(&self, name: &str, path: &Path) -> io::Result<bool> {
        let counts = self.counts.lock();
        if counts.contains_key(name) {
            return Ok(false);
        }
        std::fs::remove_file(path)?;
        Ok(true)
    }
}
