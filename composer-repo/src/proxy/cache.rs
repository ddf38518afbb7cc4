//! Cache-aside storage of upstream documents.
//!
//! [`StorageCache`] keeps each upstream document under `cache/<name>.json`
//! and records when it was fetched in the shared index at
//! [`CACHE_FILE`](super::control::CACHE_FILE). The index is rewritten
//! through a temporary key while holding the index key's exclusive guard:
//! concurrent misses for different packages then never lose each other's
//! timestamps, and a crash leaves either the old or the new index in place.

use super::control::{CacheControl, CACHE_FILE};
use super::remote::{fetch_or_empty, Remote};
use crate::error::{AppError, AppResult};
use crate::storage::{exclusively, value_if_exists, Key, Storage};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const CACHE_FOLDER: &str = "cache";

/// Loads a document, from cache when possible.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Cached document for `name` if `control` accepts it, otherwise the
    /// document fetched from `remote`. `Ok(None)` when neither has content;
    /// remote failures never surface as errors.
    async fn load(
        &self,
        name: &Key,
        remote: &dyn Remote,
        control: &dyn CacheControl,
    ) -> AppResult<Option<Bytes>>;
}

/// Always fetches from the remote and stores nothing.
pub struct NoCache;

#[async_trait]
impl Cache for NoCache {
    async fn load(
        &self,
        name: &Key,
        remote: &dyn Remote,
        _control: &dyn CacheControl,
    ) -> AppResult<Option<Bytes>> {
        debug!(name = %name, "Cache disabled, fetching from remote");
        Ok(fetch_or_empty(remote).await)
    }
}

/// Cache backed by a [`Storage`].
pub struct StorageCache {
    storage: Arc<dyn Storage>,
}

impl StorageCache {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Key of the cached document for `name`.
    pub fn cached_key(name: &Key) -> Key {
        Key::new(format!("{CACHE_FOLDER}/{name}.json"))
    }

    async fn is_valid(&self, name: &Key, control: &dyn CacheControl) -> bool {
        match control.validate(name).await {
            Ok(valid) => valid,
            Err(e) => {
                warn!(name = %name, error = %e, "Failed to validate cache entry, treating as stale");
                false
            }
        }
    }

    /// Record the fetch time of `name` in the cache index.
    async fn update_cache_file(&self, name: &Key) -> AppResult<()> {
        let storage = self.storage.as_ref();
        let index_key = Key::new(CACHE_FILE);
        let index_key = &index_key;

        exclusively(storage, index_key, move || async move {
            let mut index = match value_if_exists(storage, index_key).await? {
                Some(content) => match serde_json::from_slice::<Map<String, Value>>(&content) {
                    Ok(index) => index,
                    Err(e) => {
                        warn!(error = %e, "Cache index is malformed, starting a new one");
                        Map::new()
                    }
                },
                None => Map::new(),
            };
            index.insert(name.to_string(), Value::String(Utc::now().to_rfc3339()));

            let tmp = Key::new(format!(
                "{CACHE_FOLDER}/cache-info-{}.json",
                uuid::Uuid::new_v4()
            ));
            storage
                .save(&tmp, Bytes::from(serde_json::to_vec(&index)?))
                .await?;
            if storage.exists(index_key).await? {
                storage.delete(index_key).await?;
            }
            storage.move_to(&tmp, index_key).await?;
            debug!(name = %name, entries = index.len(), "Updated cache index");
            Ok::<(), AppError>(())
        })
        .await
    }
}

#[async_trait]
impl Cache for StorageCache {
    async fn load(
        &self,
        name: &Key,
        remote: &dyn Remote,
        control: &dyn CacheControl,
    ) -> AppResult<Option<Bytes>> {
        let cached = Self::cached_key(name);
        if self.storage.exists(&cached).await? && self.is_valid(name, control).await {
            debug!(name = %name, "Cache hit");
            return self.storage.value(&cached).await.map(Some);
        }

        debug!(name = %name, "Cache miss");
        match fetch_or_empty(remote).await {
            Some(content) => {
                self.storage.save(&cached, content).await?;
                self.update_cache_file(name).await?;
                info!(name = %name, "Cached remote document");
                self.storage.value(&cached).await.map(Some)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::control::{AlwaysValid, CacheTimeControl};
    use crate::storage::InMemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        content: Option<&'static str>,
        calls: AtomicUsize,
    }

    impl Counting {
        fn new(content: Option<&'static str>) -> Self {
            Self {
                content,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Remote for Counting {
        async fn get(&self) -> AppResult<Option<Bytes>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(self.content.map(|c| Bytes::from_static(c.as_bytes())))
        }
    }

    struct Failing;

    #[async_trait]
    impl Remote for Failing {
        async fn get(&self) -> AppResult<Option<Bytes>> {
            Err(AppError::Upstream("timed out".to_string()))
        }
    }

    struct NeverValid;

    #[async_trait]
    impl CacheControl for NeverValid {
        async fn validate(&self, _item: &Key) -> AppResult<bool> {
            Ok(false)
        }
    }

    async fn index(storage: &InMemoryStorage) -> Map<String, Value> {
        serde_json::from_slice(&storage.value(&Key::new(CACHE_FILE)).await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_hit_does_not_call_remote() {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .save(
                &Key::new("cache/psr/log.json"),
                Bytes::from_static(b"cached"),
            )
            .await
            .unwrap();
        let cache = StorageCache::new(storage.clone());
        let remote = Counting::new(Some("fresh"));

        let loaded = cache
            .load(&Key::new("psr/log"), &remote, &AlwaysValid)
            .await
            .unwrap();

        assert_eq!(loaded, Some(Bytes::from_static(b"cached")));
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_stores_content_and_timestamp() {
        let storage = Arc::new(InMemoryStorage::new());
        let cache = StorageCache::new(storage.clone());
        let control = CacheTimeControl::new(storage.clone());
        let remote = Counting::new(Some(r#"{"packages":{}}"#));
        let name = Key::new("psr/log");

        let loaded = cache.load(&name, &remote, &control).await.unwrap();
        assert_eq!(loaded, Some(Bytes::from_static(br#"{"packages":{}}"#)));
        assert_eq!(
            storage.value(&Key::new("cache/psr/log.json")).await.unwrap(),
            Bytes::from_static(br#"{"packages":{}}"#)
        );
        assert!(index(&storage).await.contains_key("psr/log"));

        // second load is served from cache
        cache.load(&name, &remote, &control).await.unwrap();
        assert_eq!(remote.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_refetched() {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .save(&Key::new("cache/psr/log.json"), Bytes::from_static(b"old"))
            .await
            .unwrap();
        storage
            .save(
                &Key::new(CACHE_FILE),
                Bytes::from_static(br#"{"psr/log":"2020-01-01T00:00:00+00:00"}"#),
            )
            .await
            .unwrap();
        let cache = StorageCache::new(storage.clone());
        let control = CacheTimeControl::new(storage.clone());
        let remote = Counting::new(Some("new"));

        let loaded = cache
            .load(&Key::new("psr/log"), &remote, &control)
            .await
            .unwrap();

        assert_eq!(loaded, Some(Bytes::from_static(b"new")));
        assert_eq!(remote.calls(), 1);
        assert_ne!(index(&storage).await["psr/log"], "2020-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_stale_entry_kept_when_remote_is_empty() {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .save(&Key::new("cache/psr/log.json"), Bytes::from_static(b"old"))
            .await
            .unwrap();
        let cache = StorageCache::new(storage.clone());

        let loaded = cache
            .load(&Key::new("psr/log"), &Counting::new(None), &NeverValid)
            .await
            .unwrap();

        assert!(loaded.is_none());
        assert_eq!(
            storage.value(&Key::new("cache/psr/log.json")).await.unwrap(),
            Bytes::from_static(b"old")
        );
    }

    #[tokio::test]
    async fn test_no_remote_content_creates_nothing() {
        let storage = Arc::new(InMemoryStorage::new());
        let cache = StorageCache::new(storage.clone());
        let control = CacheTimeControl::new(storage.clone());
        let name = Key::new("psr/log");

        assert!(cache
            .load(&name, &Counting::new(None), &control)
            .await
            .unwrap()
            .is_none());
        assert!(cache.load(&name, &Failing, &control).await.unwrap().is_none());
        assert!(storage.list(&Key::root()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_misses_keep_both_timestamps() {
        let storage = Arc::new(InMemoryStorage::new());
        let cache = StorageCache::new(storage.clone());
        let control = CacheTimeControl::new(storage.clone());
        let names: Vec<Key> = (0..6).map(|i| Key::new(format!("vendor/package{i}"))).collect();
        let remote = Counting::new(Some("{}"));

        let loads = names
            .iter()
            .map(|name| cache.load(name, &remote, &control));
        for loaded in futures_util::future::join_all(loads).await {
            assert!(loaded.unwrap().is_some());
        }

        let index = index(&storage).await;
        for name in &names {
            assert!(index.contains_key(name.as_str()), "{name}");
        }
        let leftovers: Vec<Key> = storage
            .list(&Key::new("cache"))
            .await
            .unwrap()
            .into_iter()
            .filter(|key| key.as_str().starts_with("cache/cache-info-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_index_is_replaced() {
        let storage = Arc::new(InMemoryStorage::new());
        storage
            .save(&Key::new(CACHE_FILE), Bytes::from_static(b"garbage"))
            .await
            .unwrap();
        let cache = StorageCache::new(storage.clone());

        cache
            .load(&Key::new("psr/log"), &Counting::new(Some("{}")), &NeverValid)
            .await
            .unwrap();

        assert!(index(&storage).await.contains_key("psr/log"));
    }

    #[tokio::test]
    async fn test_no_cache_always_fetches() {
        let remote = Counting::new(Some("{}"));
        let name = Key::new("psr/log");
        NoCache.load(&name, &remote, &AlwaysValid).await.unwrap();
        NoCache.load(&name, &remote, &AlwaysValid).await.unwrap();
        assert_eq!(remote.calls(), 2);
        assert!(NoCache.load(&name, &Failing, &AlwaysValid).await.unwrap().is_none());
    }
}
