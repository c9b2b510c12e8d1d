use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use owo_colors::OwoColorize;
use tokio::signal::unix::{signal, SignalKind};

use drivefs_daemon::fuse;
use drivefs_daemon::state::{AppState, StateError};
use drivefs_daemon::vfs::{FsError, Session};

use crate::cli::op::{Op, OpContext};
use crate::cli::ops::auth::{connect, AuthError};

/// Mount the drive read-only and serve it until interrupted
#[derive(Args, Debug, Clone)]
pub struct Mount {
    /// Existing empty directory to mount on
    pub mountpoint: PathBuf,
}

#[derive(Debug)]
pub struct MountOutput {
    pub mountpoint: PathBuf,
}

impl fmt::Display for MountOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", "Unmounted".green(), self.mountpoint.display())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MountError {
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("failed to start session: {0}")]
    Session(#[from] FsError),
    #[error("failed to mount {path}: {source}")]
    Mount {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to listen for shutdown signals: {0}")]
    Signal(std::io::Error),
}

#[async_trait::async_trait]
impl Op for Mount {
    type Error = MountError;
    type Output = MountOutput;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error> {
        let mut state = AppState::init(ctx.config_path.clone())?;
        let remote = connect(&mut state, ctx).await?;
        let session = Session::start(
            Arc::new(remote),
            state.session_config(fuse::current_owner()),
        )
        .await?;

        let background = match fuse::mount(&session, &self.mountpoint) {
            Ok(background) => background,
            Err(source) => {
                session.shutdown().await;
                return Err(MountError::Mount {
                    path: self.mountpoint.clone(),
                    source,
                });
            }
        };
        tracing::info!(mountpoint = %self.mountpoint.display(), "drive mounted");

        let waited = shutdown_signal().await;
        tracing::info!(mountpoint = %self.mountpoint.display(), "unmounting");
        // Dropping the background session unmounts
        drop(background);
        session.shutdown().await;
        waited.map_err(MountError::Signal)?;

        Ok(MountOutput {
            mountpoint: self.mountpoint.clone(),
        })
    }
}

/// Resolve on Ctrl-C or SIGTERM
async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mount {}", self.mountpoint.display())
    }
}
