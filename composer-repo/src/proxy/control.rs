use crate::error::AppResult;
use crate::storage::{value_if_exists, Key, Storage};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Key of the shared index mapping cached package names to fetch times.
pub const CACHE_FILE: &str = "cache/cache-info.json";

/// Default freshness window of cached upstream documents.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(10 * 60);

/// Decides whether a cached document may be served.
#[async_trait]
pub trait CacheControl: Send + Sync {
    /// Whether the cached document for `item` is still usable.
    async fn validate(&self, item: &Key) -> AppResult<bool>;
}

/// Treats every cached document as fresh.
pub struct AlwaysValid;

#[async_trait]
impl CacheControl for AlwaysValid {
    async fn validate(&self, _item: &Key) -> AppResult<bool> {
        Ok(true)
    }
}

/// Validates cached documents against the fetch times recorded in
/// [`CACHE_FILE`].
///
/// An item is valid when the index has a timestamp for it and no more than
/// `expiration` has passed since. A missing index, a malformed index or an
/// unparseable timestamp all count as not valid.
pub struct CacheTimeControl {
    storage: Arc<dyn Storage>,
    expiration: Duration,
}

impl CacheTimeControl {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_expiration(storage, DEFAULT_EXPIRATION)
    }

    pub fn with_expiration(storage: Arc<dyn Storage>, expiration: Duration) -> Self {
        Self {
            storage,
            expiration,
        }
    }

    /// Validate `item` as of `now`.
    pub async fn valid_at(&self, item: &Key, now: DateTime<Utc>) -> AppResult<bool> {
        let Some(content) = value_if_exists(self.storage.as_ref(), &Key::new(CACHE_FILE)).await?
        else {
            debug!(item = %item, "No cache index yet");
            return Ok(false);
        };

        let index: Map<String, Value> = match serde_json::from_slice(&content) {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "Cache index is malformed, treating entry as stale");
                return Ok(false);
            }
        };

        let saved = index
            .get(item.as_str())
            .and_then(Value::as_str)
            .and_then(|time| DateTime::parse_from_rfc3339(time).ok())
            .map(|time| time.with_timezone(&Utc));
        Ok(match saved {
            Some(saved) => is_fresh(saved, now, self.expiration),
            None => false,
        })
    }
}

#[async_trait]
impl CacheControl for CacheTimeControl {
    async fn validate(&self, item: &Key) -> AppResult<bool> {
        self.valid_at(item, Utc::now()).await
    }
}

/// `now - saved <= ttl`. Timestamps from the future are fresh.
pub fn is_fresh(saved: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> bool {
    match (now - saved).to_std() {
        Ok(age) => age <= ttl,
        Err(_) => true,
    }
}
