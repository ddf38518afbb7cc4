use crate::config::ProxyConfig;
use crate::name::PackageName;
use crate::{AppError, AppResult};
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the upstream Composer registry.
///
/// # Fields
///
/// * `url` - Base URL of the upstream registry, e.g. "https://repo.packagist.org"
/// * `timeout` - HTTP request timeout for upstream calls
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use composer_repo::upstream::UpstreamConfig;
///
/// let config = UpstreamConfig {
///     url: "https://repo.packagist.org".to_string(),
///     timeout: Duration::from_secs(30),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the upstream registry, without trailing slash
    pub url: String,
    /// HTTP request timeout for upstream calls
    pub timeout: Duration,
}

impl From<&ProxyConfig> for UpstreamConfig {
    fn from(proxy: &ProxyConfig) -> Self {
        Self {
            url: proxy.remote_url.trim_end_matches('/').to_string(),
            timeout: proxy.timeout(),
        }
    }
}

/// HTTP client for the upstream registry.
///
/// Fetches per-package metadata documents from the upstream `p2` endpoint.
/// A missing package is not an error: [`UpstreamClient::fetch_package`]
/// returns `Ok(None)`. Transport failures and unexpected statuses are
/// reported as [`AppError::Upstream`].
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Create a new upstream client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be created.
    pub fn new(config: UpstreamConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("composer-repo/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// URL of the upstream metadata document for `name`.
    pub fn package_url(&self, name: &PackageName) -> String {
        format!(
            "{}/p2/{}/{}.json",
            self.config.url,
            name.vendor(),
            name.package()
        )
    }

    /// Fetch the upstream metadata document for a package.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(bytes))` with the raw document on success
    /// * `Ok(None)` if the package does not exist upstream
    /// * `Err(AppError::Upstream)` if the request failed or returned an unexpected status
    pub async fn fetch_package(&self, name: &PackageName) -> AppResult<Option<Bytes>> {
        let url = self.package_url(name);
        debug!(url = %url, "Fetching package metadata from upstream");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, url = %url, "Failed to fetch from upstream");
                AppError::Upstream(format!("Request to {url} failed: {e}"))
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(package = %name, "Package not found upstream");
            return Ok(None);
        }
        if !status.is_success() {
            warn!(package = %name, status = %status, "Upstream returned an error status");
            return Err(AppError::Upstream(format!(
                "Upstream returned {status} for {url}"
            )));
        }

        let content = response.bytes().await.map_err(|e| {
            AppError::Upstream(format!("Failed to read upstream response: {e}"))
        })?;
        info!(package = %name, size = content.len(), "Successfully fetched from upstream");
        Ok(Some(content))
    }
}
