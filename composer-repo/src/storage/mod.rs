//! # Key/Value Object Storage
//!
//! Every document the repository owns (registries, cached upstream documents,
//! the cache index, uploaded archives) lives in a [`Storage`] under a [`Key`].
//! Keys are `/`-separated relative paths such as `packages.json`,
//! `vendor/package.json` or `cache/cache-info.json`.
//!
//! Two implementations are provided:
//!
//! - [`FileStorage`]: keys map to files below a data directory
//! - [`InMemoryStorage`]: a map guarded by an async lock, used by tests and
//!   short-lived tooling
//!
//! Mutual exclusion scoped to a single key is available through
//! [`exclusively`]. It serialises read-modify-write sequences on shared
//! documents without holding any global lock.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

mod fs;
mod memory;

pub use fs::FileStorage;
pub use memory::InMemoryStorage;

/// Location of a document in storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    /// Build a key from a `/`-separated path. Leading and trailing slashes
    /// and empty segments are dropped.
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalized = path
            .as_ref()
            .split('/')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Key(normalized)
    }

    /// Build a key by joining parts with `/`.
    pub fn from_parts<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = parts
            .into_iter()
            .map(|part| part.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("/");
        Key::new(joined)
    }

    /// The empty key, prefix of every other key.
    pub fn root() -> Self {
        Key(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `self` lies below `prefix` (segment-wise).
    pub fn starts_with(&self, prefix: &Key) -> bool {
        prefix.0.is_empty()
            || self.0 == prefix.0
            || (self.0.starts_with(&prefix.0) && self.0[prefix.0.len()..].starts_with('/'))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Asynchronous key/value object store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Whether a document exists at `key`.
    async fn exists(&self, key: &Key) -> AppResult<bool>;

    /// Read the document at `key`, failing with [`AppError::NotFound`] if absent.
    async fn value(&self, key: &Key) -> AppResult<Bytes>;

    /// Create or overwrite the document at `key`.
    async fn save(&self, key: &Key, content: Bytes) -> AppResult<()>;

    /// Remove the document at `key`, failing with [`AppError::NotFound`] if absent.
    async fn delete(&self, key: &Key) -> AppResult<()>;

    /// Move the document at `source` onto `destination`, replacing it.
    async fn move_to(&self, source: &Key, destination: &Key) -> AppResult<()>;

    /// All keys below `prefix`, sorted.
    async fn list(&self, prefix: &Key) -> AppResult<Vec<Key>>;

    /// Acquire the exclusive guard for `key`. Held until the guard is dropped.
    async fn lock(&self, key: &Key) -> OwnedMutexGuard<()>;
}

/// Run `op` while holding the exclusive guard for `key`.
///
/// Only callers that go through `exclusively` with the same key are
/// serialised; plain reads and writes are not blocked.
pub async fn exclusively<S, F, Fut, T>(storage: &S, key: &Key, op: F) -> AppResult<T>
where
    S: Storage + ?Sized,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = AppResult<T>> + Send,
{
    let guard = storage.lock(key).await;
    tracing::trace!(key = %key, "Acquired exclusive access");
    let result = op().await;
    drop(guard);
    tracing::trace!(key = %key, "Released exclusive access");
    result
}

/// Named mutexes, one per storage key.
///
/// The map only grows with the number of distinct keys ever locked, which in
/// practice is the single cache index key.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &Key) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };
        mutex.lock_owned().await
    }
}

/// Read a document if it exists, `None` otherwise.
pub async fn value_if_exists<S>(storage: &S, key: &Key) -> AppResult<Option<Bytes>>
where
    S: Storage + ?Sized,
{
    match storage.value(key).await {
        Ok(content) => Ok(Some(content)),
        Err(AppError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_key_normalization() {
        assert_eq!(Key::new("/cache//vendor/package.json/").as_str(), "cache/vendor/package.json");
        assert_eq!(
            Key::from_parts(["artifacts", "log-1.1.3.zip"]).as_str(),
            "artifacts/log-1.1.3.zip"
        );
        assert_eq!(Key::root().as_str(), "");
    }

    #[test]
    fn test_key_prefix_is_segment_aware() {
        let key = Key::new("cache/vendor/package.json");
        assert!(key.starts_with(&Key::new("cache")));
        assert!(key.starts_with(&Key::root()));
        assert!(!key.starts_with(&Key::new("cac")));
        assert!(!Key::new("cache-info.json").starts_with(&Key::new("cache")));
    }

    #[tokio::test]
    async fn test_exclusively_serializes_same_key() {
        let storage = Arc::new(InMemoryStorage::new());
        let key = Key::new("cache/cache-info.json");
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = storage.clone();
            let key = key.clone();
            let active = active.clone();
            let overlap = overlap.clone();
            handles.push(tokio::spawn(async move {
                exclusively(storage.as_ref(), &key, || async {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok::<(), AppError>(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exclusively_does_not_block_other_keys() {
        let storage = InMemoryStorage::new();
        let first = Key::new("a.json");
        let second = Key::new("b.json");

        let _held = storage.lock(&first).await;
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            exclusively(&storage, &second, || async { Ok::<_, AppError>(42) }),
        )
        .await
        .expect("lock on a different key must not wait");
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_value_if_exists() {
        let storage = InMemoryStorage::new();
        let key = Key::new("vendor/package.json");
        assert!(value_if_exists(&storage, &key).await.unwrap().is_none());
        storage.save(&key, Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(
            value_if_exists(&storage, &key).await.unwrap().unwrap(),
            Bytes::from_static(b"{}")
        );
    }
}
