pub mod auth;
pub mod cache;
pub mod info;
#[cfg(feature = "fuse")]
pub mod mount;

pub use auth::Auth;
pub use cache::Cache;
pub use info::Info;
#[cfg(feature = "fuse")]
pub use mount::Mount;
