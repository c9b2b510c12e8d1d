use std::path::PathBuf;

use clap::Parser;

pub mod op;
pub mod ops;

#[cfg(feature = "fuse")]
use ops::Mount;
use ops::{Auth, Cache, Info};

#[cfg(feature = "fuse")]
crate::command_enum! {
    (Mount, Mount),
    (Auth, Auth),
    (Info, Info),
    (Cache, Cache),
}

#[cfg(not(feature = "fuse"))]
crate::command_enum! {
    (Auth, Auth),
    (Info, Info),
    (Cache, Cache),
}

/// Read-only Google Drive filesystem
#[derive(Parser, Debug)]
#[command(name = "drivefs", version, about)]
pub struct Args {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Trace every FUSE request, whatever the rest of the log level is
    #[arg(long, global = true)]
    pub fuse_debug: bool,

    /// drivefs directory holding the config file and cache (default ~/.drivefs)
    #[arg(long, global = true, env = "DRIVEFS_DIR")]
    pub dir: Option<PathBuf>,

    /// OAuth client id
    #[arg(long, global = true, env = "DRIVEFS_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long, global = true, env = "DRIVEFS_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}
