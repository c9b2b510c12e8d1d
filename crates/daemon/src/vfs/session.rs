//! Mount lifecycle
//!
//! A [`Session`] ties the node tree, the fetchers' cache directory and the
//! reaper together. It is created before the kernel mount and shut down
//! after the unmount.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::RemoteAccess;

use super::error::FsError;
use super::fetcher::FetchOptions;
use super::node::Owner;
use super::pins::CachePins;
use super::reaper::{CacheReaper, ReaperHandle};
use super::tree::{NodeTree, TreeSettings};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cache_dir: PathBuf,
    /// Cache files idle for longer than this are evicted
    pub cache_ttl: Duration,
    pub reaper_interval: Duration,
    pub owner: Owner,
    pub fetch: FetchOptions,
}

impl SessionConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            cache_ttl: Duration::from_secs(24 * 3600),
            reaper_interval: Duration::from_secs(3600),
            owner: Owner::default(),
            fetch: FetchOptions::default(),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    tree: Arc<NodeTree>,
    config: SessionConfig,
    reaper: Option<ReaperHandle>,
}

impl Session {
    /// Prepare the cache directory, mirror the root folder and start the reaper
    pub async fn start(remote: Arc<dyn RemoteAccess>, config: SessionConfig) -> Result<Self, FsError> {
        tokio::fs::create_dir_all(&config.cache_dir).await?;
        let root = remote.get_root_descriptor().await?;
        tracing::info!(
            root = %root.id,
            cache_dir = %config.cache_dir.display(),
            "starting filesystem session"
        );

        let pins = CachePins::new();
        let tree = Arc::new(NodeTree::new(
            remote,
            root,
            TreeSettings {
                cache_dir: config.cache_dir.clone(),
                owner: config.owner,
                fetch: config.fetch.clone(),
            },
            pins.clone(),
        ));
        let reaper = CacheReaper::new(config.cache_dir.clone(), config.cache_ttl, pins)
            .spawn(config.reaper_interval);

        Ok(Self {
            tree,
            config,
            reaper: Some(reaper),
        })
    }

    pub fn tree(&self) -> &Arc<NodeTree> {
        &self.tree
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Stop the reaper and wait for it to acknowledge
    pub async fn shutdown(mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.shutdown().await;
        }
        tracing::info!("filesystem session stopped");
    }
}
