//! # Configuration Management
//!
//! Configuration for the Composer repository server, loaded from a JSON file.
//! Every section falls back to built-in defaults, so an empty `{}` file (or
//! no file at all) yields a working hosted repository on `0.0.0.0:3080`.
//!
//! - [`ServerConfig`]: bind address
//! - [`StorageConfig`]: data directory backing [`FileStorage`](crate::storage::FileStorage)
//! - [`RepositoryConfig`]: URL prefix stamped into archive `dist` pointers
//! - [`ProxyConfig`]: upstream registry and cache settings; its presence
//!   switches the server into proxy mode
//! - [`LimitsConfig`]: upload limits
//!
//! ```rust,no_run
//! # use composer_repo::config::Config;
//! let config = Config::load_or_default("composer-repo.json")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! A proxy configuration looks like:
//!
//! ```json
//! {
//!   "server": { "host": "127.0.0.1", "port": 3080 },
//!   "storage": { "data_dir": "/var/lib/composer" },
//!   "proxy": {
//!     "remote_url": "https://repo.packagist.org",
//!     "timeout_secs": 30,
//!     "cache": { "enabled": true, "ttl_secs": 600 }
//!   }
//! }
//! ```

use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    /// Upstream proxy settings. `None` runs a hosted repository.
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host/IP address to bind to (e.g., "0.0.0.0" or "localhost")
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for registries, artifacts and cached documents
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Hosted repository settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Public base URL of this repository, e.g. `http://localhost:3080`.
    /// Archive publishes are rejected while unset.
    #[serde(default)]
    pub url_prefix: Option<String>,
}

/// Upstream registry proxied by this server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub remote_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub cache: CacheConfig,
}

impl ProxyConfig {
    pub fn new(remote_url: impl Into<String>) -> Self {
        Self {
            remote_url: remote_url.into(),
            timeout_secs: default_timeout_secs(),
            cache: CacheConfig::default(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

/// Proxy cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Freshness window of cached upstream documents
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 600,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Upload limits configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_upload_size_mb: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        LimitsConfig {
            max_upload_size_mb: 100,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or does not match the configuration
    /// format.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config_str = fs::read_to_string(path)?;
        let config = serde_json::from_str(&config_str)?;
        Ok(config)
    }

    /// Load configuration from file with fallback to defaults when the file
    /// does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the maximum upload size in bytes.
    pub fn max_upload_size_bytes(&self) -> usize {
        self.limits
            .max_upload_size_mb
            .saturating_mul(1024 * 1024)
    }
}
