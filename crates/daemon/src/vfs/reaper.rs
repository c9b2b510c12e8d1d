//! Cache eviction
//!
//! The reaper periodically deletes cache files that have not been accessed
//! for longer than the configured TTL. Dot-files (the config lives in the
//! same directory), directories and pinned files are left alone.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::pins::CachePins;

/// Counts from one pass over the cache directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub scanned: usize,
    pub removed: usize,
    pub pinned: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct CacheReaper {
    cache_dir: PathBuf,
    ttl: Duration,
    pins: CachePins,
}

impl CacheReaper {
    pub fn new(cache_dir: impl Into<PathBuf>, ttl: Duration, pins: CachePins) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ttl,
            pins,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Delete every expired, unpinned cache file
    ///
    /// Individual failures are logged and counted; only an unreadable cache
    /// directory aborts the sweep.
    pub fn sweep(&self) -> std::io::Result<SweepStats> {
        let now = SystemTime::now();
        let mut stats = SweepStats::default();

        for entry in std::fs::read_dir(&self.cache_dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read cache entry");
                    stats.failed += 1;
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "failed to stat cache file");
                    stats.failed += 1;
                    continue;
                }
            };
            stats.scanned += 1;

            let accessed = metadata.accessed().or_else(|_| metadata.modified());
            let age = match accessed {
                Ok(t) => now.duration_since(t).unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "no access time for cache file");
                    stats.failed += 1;
                    continue;
                }
            };
            if age <= self.ttl {
                continue;
            }

            match self.pins.remove_if_unpinned(&name, &entry.path()) {
                Ok(true) => {
                    tracing::debug!(file = %name, age_secs = age.as_secs(), "removed expired cache file");
                    stats.removed += 1;
                }
                Ok(false) => stats.pinned += 1,
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "failed to remove cache file");
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Sweep every `interval` until the returned handle is shut down
    ///
    /// The first sweep runs one interval after the call.
    pub fn spawn(self, interval: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(
                dir = %self.cache_dir.display(),
                interval_secs = interval.as_secs(),
                ttl_secs = self.ttl.as_secs(),
                "cache reaper started"
            );

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let reaper = self.clone();
                        match tokio::task::spawn_blocking(move || reaper.sweep()).await {
                            Ok(Ok(stats)) => tracing::debug!(
                                scanned = stats.scanned,
                                removed = stats.removed,
                                pinned = stats.pinned,
                                failed = stats.failed,
                                "cache sweep finished"
                            ),
                            Ok(Err(e)) => tracing::warn!(error = %e, "cache sweep failed"),
                            Err(e) => tracing::warn!(error = %e, "cache sweep task failed"),
                        }
                    }
                }
            }

            tracing::info!("cache reaper stopped");
        });

        ReaperHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Running reaper task
#[derive(Debug)]
pub struct ReaperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Signal the reaper and wait until it has stopped
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "cache reaper task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    const HOUR: u64 = 3600;

    fn aged_file(dir: &TempDir, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"cached").unwrap();
        let then = FileTime::from_system_time(SystemTime::now() - Duration::from_secs(age_secs));
        filetime::set_file_times(&path, then, then).unwrap();
        path
    }

    fn reaper(dir: &TempDir, pins: &CachePins) -> CacheReaper {
        CacheReaper::new(dir.path(), Duration::from_secs(24 * HOUR), pins.clone())
    }

    #[test]
    fn test_ttl_threshold() {
        let dir = TempDir::new().unwrap();
        let young = aged_file(&dir, "young", 23 * HOUR);
        let old = aged_file(&dir, "old", 25 * HOUR);

        let stats = reaper(&dir, &CachePins::new()).sweep().unwrap();

        assert!(young.exists());
        assert!(!old.exists());
        assert_eq!(stats.scanned, 2);
        assert_eq!(stats.removed, 1);
    }

    #[test]
    fn test_dotfiles_and_directories_survive() {
        let dir = TempDir::new().unwrap();
        let config = aged_file(&dir, ".config.toml", 100 * HOUR);
        let subdir = dir.path().join("logs");
        std::fs::create_dir(&subdir).unwrap();

        let stats = reaper(&dir, &CachePins::new()).sweep().unwrap();

        assert!(config.exists());
        assert!(subdir.exists());
        assert_eq!(stats.scanned, 0);
        assert_eq!(stats.removed, 0);
    }

    #[test]
    fn test_pinned_files_survive() {
        let dir = TempDir::new().unwrap();
        let pins = CachePins::new();
        let open = aged_file(&dir, "open-file", 48 * HOUR);
        pins.pin("open-file");

        let stats = reaper(&dir, &pins).sweep().unwrap();
        assert!(open.exists());
        assert_eq!(stats.pinned, 1);

        pins.unpin("open-file");
        let stats = reaper(&dir, &pins).sweep().unwrap();
        assert!(!open.exists());
        assert_eq!(stats.removed, 1);
    }

    #[test]
    fn test_missing_cache_dir() {
        let dir = TempDir::new().unwrap();
        let reaper = CacheReaper::new(
            dir.path().join("absent"),
            Duration::from_secs(HOUR),
            CachePins::new(),
        );
        assert!(reaper.sweep().is_err());
    }

    #[tokio::test]
    async fn test_spawned_reaper_sweeps_and_stops() {
        let dir = TempDir::new().unwrap();
        let old = aged_file(&dir, "old", 25 * HOUR);

        let handle = reaper(&dir, &CachePins::new()).spawn(Duration::from_millis(20));
        for _ in 0..100 {
            if !old.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!old.exists());

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
    }
}
