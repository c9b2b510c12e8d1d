use std::fmt;
use std::path::{Path, PathBuf};

use clap::Args;
use owo_colors::OwoColorize;

use drivefs_daemon::state::{AppState, StateError};

use crate::cli::op::{Op, OpContext};
use crate::cli::ops::info::file_size_format;

/// Show how many files the cache holds and how much space they take
#[derive(Args, Debug, Clone)]
pub struct Status;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CacheUsage {
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug)]
pub struct StatusOutput {
    pub cache_dir: PathBuf,
    pub ttl_hours: u64,
    pub usage: CacheUsage,
}

impl fmt::Display for StatusOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", "Cache".bold())?;
        writeln!(f, "  {} {}", "directory:".dimmed(), self.cache_dir.display())?;
        writeln!(f, "  {} {}", "files:".dimmed(), self.usage.files)?;
        writeln!(f, "  {} {}", "size:".dimmed(), file_size_format(self.usage.bytes))?;
        write!(f, "  {} {}h", "ttl:".dimmed(), self.ttl_hours)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl Op for Status {
    type Error = StatusError;
    type Output = StatusOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let state = AppState::load(ctx.config_path.clone())?;
        let usage = if state.cache_dir.exists() {
            cache_usage(&state.cache_dir)?
        } else {
            CacheUsage::default()
        };

        Ok(StatusOutput {
            cache_dir: state.cache_dir,
            ttl_hours: state.config.cache_ttl_hours,
            usage,
        })
    }
}

/// Same selection rule as the reaper: regular files that are not dot-files
fn cache_usage(dir: &Path) -> std::io::Result<CacheUsage> {
    let mut usage = CacheUsage::default();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            usage.files += 1;
            usage.bytes += metadata.len();
        }
    }
    Ok(usage)
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache status")
    }
}
