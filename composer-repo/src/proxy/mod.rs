//! # Upstream Proxy
//!
//! In proxy mode the server answers per-package metadata requests by merging
//! what it hosts locally with the upstream registry's document for the same
//! package. The upstream document goes through a [`Cache`] so repeated
//! requests within the freshness window do not reach the upstream.
//!
//! Reading the local fragment and loading the remote one run concurrently.
//! Upstream failures degrade to "local only"; a package known to neither
//! side is reported as absent.

use crate::error::AppResult;
use crate::name::PackageName;
use crate::repository::Repository;
use crate::storage::Key;
use crate::upstream::UpstreamClient;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

pub mod cache;
pub mod control;
pub mod merge;
pub mod remote;

pub use cache::{Cache, NoCache, StorageCache};
pub use control::{AlwaysValid, CacheControl, CacheTimeControl, CACHE_FILE};
pub use merge::MergePackage;
pub use remote::{Remote, UpstreamRemote};

/// Root document served in proxy mode. Clients resolve packages through
/// `metadata-url`.
pub const ALL_PACKAGES_DOCUMENT: &str = r#"{"packages":{},"metadata-url":"/p2/%package%.json"}"#;

/// Local repository merged with a cached upstream.
pub struct CachedProxy {
    repository: Repository,
    upstream: Arc<UpstreamClient>,
    cache: Arc<dyn Cache>,
    control: Arc<dyn CacheControl>,
}

impl CachedProxy {
    pub fn new(
        repository: Repository,
        upstream: Arc<UpstreamClient>,
        cache: Arc<dyn Cache>,
        control: Arc<dyn CacheControl>,
    ) -> Self {
        Self {
            repository,
            upstream,
            cache,
            control,
        }
    }

    /// Merged metadata of `name`, or `None` if neither the local repository
    /// nor the upstream knows any version.
    pub async fn package(&self, name: &PackageName) -> AppResult<Option<Bytes>> {
        let remote = UpstreamRemote::new(self.upstream.clone(), name.clone());
        let cache_key = Key::new(name.to_string());

        let (local, upstream) = tokio::join!(
            self.repository.packages_for(name),
            self.cache.load(&cache_key, &remote, self.control.as_ref()),
        );
        let local = local?.unwrap_or_default();
        let upstream = upstream?;
        debug!(
            package = %name,
            remote = upstream.is_some(),
            "Loaded local and remote metadata"
        );

        MergePackage::new(name.to_string(), local.content()).merge(upstream.as_deref())
    }
}

/// Package name requested by a `p2` metadata path segment pair, e.g.
/// `("psr", "log~dev.json")`. Stability (`~dev`) and cache-busting (`^hash`)
/// suffixes are dropped.
pub fn requested_name(vendor: &str, file: &str) -> AppResult<PackageName> {
    let package = file.strip_suffix(".json").unwrap_or(file);
    let package = package
        .split(['~', '^'])
        .next()
        .unwrap_or_default();
    PackageName::parse(&format!("{vendor}/{package}"))
}
