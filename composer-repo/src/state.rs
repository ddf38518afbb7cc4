//! # Application State Management
//!
//! Shared state handed to every request handler. It is built once at
//! startup by [`AppState::from_config`] and shared through an `Arc`.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use composer_repo::{config::Config, state::AppState, storage::FileStorage};
//!
//! let config = Config::default();
//! let storage = Arc::new(FileStorage::new(&config.storage.data_dir));
//! let state = Arc::new(AppState::from_config(config, storage)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::config::Config;
use crate::error::AppResult;
use crate::proxy::{Cache, CacheTimeControl, CachedProxy, NoCache, StorageCache};
use crate::repository::Repository;
use crate::storage::Storage;
use crate::upstream::{UpstreamClient, UpstreamConfig};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Application state containing shared configuration and resources.
#[derive(Clone)]
pub struct AppState {
    /// Hosted registries and artifacts
    pub repository: Repository,
    /// Upstream proxy, present in proxy mode only
    pub proxy: Option<Arc<CachedProxy>>,
    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire the repository, and the proxy when `config.proxy` is set, on top
    /// of `storage`.
    pub fn from_config(config: Config, storage: Arc<dyn Storage>) -> AppResult<Self> {
        let repository = Repository::new(storage.clone(), config.repository.url_prefix.clone());

        let proxy = match &config.proxy {
            Some(proxy_config) => {
                let upstream = Arc::new(UpstreamClient::new(UpstreamConfig::from(proxy_config))?);
                let cache: Arc<dyn Cache> = if proxy_config.cache.enabled {
                    Arc::new(StorageCache::new(storage.clone()))
                } else {
                    Arc::new(NoCache)
                };
                let control = Arc::new(CacheTimeControl::with_expiration(
                    storage,
                    proxy_config.cache.ttl(),
                ));
                info!(
                    remote = %proxy_config.remote_url,
                    cache = proxy_config.cache.enabled,
                    ttl_secs = proxy_config.cache.ttl_secs,
                    "Proxy mode enabled"
                );
                Some(Arc::new(CachedProxy::new(
                    repository.clone(),
                    upstream,
                    cache,
                    control,
                )))
            }
            None => None,
        };

        Ok(Self {
            repository,
            proxy,
            config: Arc::new(config),
        })
    }

    pub fn is_proxy(&self) -> bool {
        self.proxy.is_some()
    }
}

/// Standardized success response for API consistency.
///
/// Serializes to: `{"message": "Operation completed successfully"}`
#[derive(Serialize)]
pub struct SuccessResponse {
    /// Human-readable success message describing the completed operation
    pub message: String,
}
