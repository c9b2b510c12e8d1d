//! On-disk application state: the drivefs directory and its config file
//!
//! The directory (default `~/.drivefs`) holds `.config.toml` and, unless
//! `cache_dir` points elsewhere, the cache files themselves. The config file
//! is a dot-file so the cache reaper never touches it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::vfs::{ChecksumPolicy, FetchOptions, Owner, SessionConfig};

pub const APP_NAME: &str = "drivefs";
pub const CONFIG_FILE_NAME: &str = ".config.toml";

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("could not determine the home directory")]
    NoHomeDir,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Contents of `.config.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Long-lived token obtained by `drivefs auth`
    pub refresh_token: Option<String>,
    pub cache_ttl_hours: u64,
    pub reaper_interval_secs: u64,
    pub readiness_threshold_bytes: u64,
    pub read_poll_interval_ms: u64,
    pub checksum_policy: ChecksumPolicy,
    /// Where cache files live; the drivefs directory when unset
    pub cache_dir: Option<PathBuf>,
    /// Enables a daily rolling log file in this directory
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            refresh_token: None,
            cache_ttl_hours: 24,
            reaper_interval_secs: 3600,
            readiness_threshold_bytes: 64 * 1024,
            read_poll_interval_ms: 500,
            checksum_policy: ChecksumPolicy::Purge,
            cache_dir: None,
            log_dir: None,
        }
    }
}

impl AppConfig {
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            readiness_threshold: self.readiness_threshold_bytes,
            poll_interval: Duration::from_millis(self.read_poll_interval_ms),
            checksum_policy: self.checksum_policy,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// The drivefs directory
    pub dir: PathBuf,
    pub config_path: PathBuf,
    pub cache_dir: PathBuf,
    pub config: AppConfig,
}

impl AppState {
    /// Resolve the drivefs directory: `custom` when given, else `~/.drivefs`
    pub fn drivefs_dir(custom: Option<PathBuf>) -> Result<PathBuf, StateError> {
        match custom {
            Some(dir) => Ok(dir),
            None => dirs::home_dir()
                .map(|home| home.join(format!(".{}", APP_NAME)))
                .ok_or(StateError::NoHomeDir),
        }
    }

    /// Load state, falling back to defaults when no config file exists yet
    pub fn load(custom: Option<PathBuf>) -> Result<Self, StateError> {
        let dir = Self::drivefs_dir(custom)?;
        let config_path = dir.join(CONFIG_FILE_NAME);
        let config = if config_path.exists() {
            let raw = std::fs::read_to_string(&config_path)?;
            toml::from_str(&raw).map_err(|source| StateError::Parse {
                path: config_path.clone(),
                source,
            })?
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            AppConfig::default()
        };

        Ok(Self::from_parts(dir, config_path, config))
    }

    /// Load state and make sure the directory and config file exist
    pub fn init(custom: Option<PathBuf>) -> Result<Self, StateError> {
        let state = Self::load(custom)?;
        std::fs::create_dir_all(&state.dir)?;
        if !state.config_path.exists() {
            state.save()?;
        }
        Ok(state)
    }

    fn from_parts(dir: PathBuf, config_path: PathBuf, config: AppConfig) -> Self {
        let cache_dir = config.cache_dir.clone().unwrap_or_else(|| dir.clone());
        Self {
            dir,
            config_path,
            cache_dir,
            config,
        }
    }

    /// Write the config file; it holds credentials, so it is private to the user
    pub fn save(&self) -> Result<(), StateError> {
        use std::os::unix::fs::PermissionsExt;

        std::fs::create_dir_all(&self.dir)?;
        let raw = toml::to_string_pretty(&self.config)?;
        write_private(&self.config_path, &raw)?;
        std::fs::set_permissions(&self.config_path, std::fs::Permissions::from_mode(0o600))?;
        tracing::debug!(path = %self.config_path.display(), "saved config");
        Ok(())
    }

    /// Session settings derived from the config
    pub fn session_config(&self, owner: Owner) -> SessionConfig {
        SessionConfig {
            cache_dir: self.cache_dir.clone(),
            cache_ttl: ttl_from_hours(self.config.cache_ttl_hours),
            reaper_interval: Duration::from_secs(self.config.reaper_interval_secs),
            owner,
            fetch: self.config.fetch_options(),
        }
    }
}

/// Cache TTL for a configured hour count; absurd values saturate instead of overflowing
pub fn ttl_from_hours(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(3600))
}

fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_config_file() {
        let dir = TempDir::new().unwrap();
        let state = AppState::load(Some(dir.path().to_path_buf())).unwrap();

        assert_eq!(state.config, AppConfig::default());
        assert_eq!(state.cache_dir, dir.path());
        assert_eq!(state.config_path, dir.path().join(".config.toml"));
        assert!(!state.config_path.exists());
    }

    #[test]
    fn test_config_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut state = AppState::init(Some(dir.path().to_path_buf())).unwrap();
        assert!(state.config_path.exists());

        state.config.client_id = Some("client".to_string());
        state.config.refresh_token = Some("1/refresh".to_string());
        state.config.checksum_policy = ChecksumPolicy::Warn;
        state.config.cache_ttl_hours = 6;
        state.save().unwrap();

        let loaded = AppState::load(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(loaded.config, state.config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "checksum_policy = \"warn\"\ncache_dir = \"/var/cache/drivefs\"\n",
        )
        .unwrap();

        let state = AppState::load(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(state.config.checksum_policy, ChecksumPolicy::Warn);
        assert_eq!(state.config.cache_ttl_hours, 24);
        assert_eq!(state.cache_dir, PathBuf::from("/var/cache/drivefs"));

        let session = state.session_config(Owner::default());
        assert_eq!(session.cache_ttl, Duration::from_secs(24 * 3600));
        assert_eq!(session.fetch.readiness_threshold, 65536);
        assert_eq!(session.fetch.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            format!("cache_ttl_hours = {}", u64::MAX),
        )
        .unwrap();

        let state = AppState::load(Some(dir.path().to_path_buf())).unwrap();
        let session = state.session_config(Owner::default());
        assert_eq!(session.cache_ttl, Duration::from_secs(u64::MAX));
        assert_eq!(ttl_from_hours(2), Duration::from_secs(7200));
    }

    #[test]
    fn test_invalid_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "cache_ttl_hours = \"soon\"").unwrap();

        let err = AppState::load(Some(dir.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, StateError::Parse { .. }));
    }

    #[test]
    fn test_config_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let state = AppState::init(Some(dir.path().to_path_buf())).unwrap();
        let mode = std::fs::metadata(&state.config_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
