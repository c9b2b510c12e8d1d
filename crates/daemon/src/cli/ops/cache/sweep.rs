use std::fmt;
use std::path::PathBuf;
use clap::Args;
use owo_colors::OwoColorize;

use drivefs_daemon::state::{ttl_from_hours, AppState, StateError};
use drivefs_daemon::vfs::{CachePins, CacheReaper, SweepStats};

use crate::cli::op::{Op, OpContext};

/// Run one eviction pass over the cache directory
#[derive(Args, Debug, Clone)]
pub struct Sweep {
    /// Evict files idle for longer than this many hours instead of the configured TTL
    #[arg(long)]
    pub ttl_hours: Option<u64>,
}

#[derive(Debug)]
pub struct SweepOutput {
    pub cache_dir: PathBuf,
    pub stats: SweepStats,
}

impl fmt::Display for SweepOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", "Swept".bold(), self.cache_dir.display())?;
        writeln!(f, "  {} {}", "scanned:".dimmed(), self.stats.scanned)?;
        writeln!(f, "  {} {}", "removed:".dimmed(), self.stats.removed.green())?;
        writeln!(f, "  {} {}", "pinned:".dimmed(), self.stats.pinned)?;
        if self.stats.failed > 0 {
            write!(f, "  {} {}", "failed:".dimmed(), self.stats.failed.red())
        } else {
            write!(f, "  {} {}", "failed:".dimmed(), self.stats.failed)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("sweep of {path} failed: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("sweep task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait::async_trait]
impl Op for Sweep {
    type Error = SweepError;
    type Output = SweepOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let ttl_hours = self.ttl_hours.unwrap_or(state.config.cache_ttl_hours);

        // Pins only cover this process; a running mount's open files are
        // still readable through their descriptors after removal.
        let reaper = CacheReaper::new(
            state.cache_dir.clone(),
            ttl_from_hours(ttl_hours),
            CachePins::new(),
        );
        let stats = tokio::task::spawn_blocking(move || reaper.sweep())
            .await?
            .map_err(|source| SweepError::Io {
                path: state.cache_dir.clone(),
                source,
            })?;
        tracing::info!(removed = stats.removed, scanned = stats.scanned, "manual cache sweep");

        Ok(SweepOutput {
            cache_dir: state.cache_dir,
            stats,
        })
    }
}

impl fmt::Display for Sweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache sweep")
    }
}
