use crate::error::AppResult;
use crate::name::PackageName;
use crate::upstream::UpstreamClient;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::warn;

/// Source of an upstream document.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Fetch the document. `Ok(None)` when the upstream has nothing.
    async fn get(&self) -> AppResult<Option<Bytes>>;
}

/// Upstream metadata document of one package.
pub struct UpstreamRemote {
    client: Arc<UpstreamClient>,
    name: PackageName,
}

impl UpstreamRemote {
    pub fn new(client: Arc<UpstreamClient>, name: PackageName) -> Self {
        Self { client, name }
    }
}

#[async_trait]
impl Remote for UpstreamRemote {
    async fn get(&self) -> AppResult<Option<Bytes>> {
        self.client.fetch_package(&self.name).await
    }
}

/// Fetch from `remote`, turning any failure into "no content".
pub async fn fetch_or_empty(remote: &dyn Remote) -> Option<Bytes> {
    match remote.get().await {
        Ok(content) => content,
        Err(e) => {
            warn!(error = %e, "Remote fetch failed, responding without remote content");
            None
        }
    }
}
