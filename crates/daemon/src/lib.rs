// Filesystem engine
pub mod vfs;

// Kernel adapter
#[cfg(feature = "fuse")]
pub mod fuse;

// App state (configuration, paths)
pub mod state;

pub use state::{AppConfig, AppState, StateError};
pub use vfs::{FsError, Session, SessionConfig};
