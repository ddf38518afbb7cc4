use super::{Key, KeyLocks, Storage};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::debug;

/// Storage that keeps every document in memory.
#[derive(Default)]
pub struct InMemoryStorage {
    data: RwLock<BTreeMap<Key, Bytes>>,
    locks: KeyLocks,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn exists(&self, key: &Key) -> AppResult<bool> {
        Ok(self.data.read().await.contains_key(key))
    }

    async fn value(&self, key: &Key) -> AppResult<Bytes> {
        self.data
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("No value for key: {key}")))
    }

    async fn save(&self, key: &Key, content: Bytes) -> AppResult<()> {
        debug!(key = %key, size = content.len(), "Saving value in memory");
        self.data.write().await.insert(key.clone(), content);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> AppResult<()> {
        self.data
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("No value for key: {key}")))
    }

    async fn move_to(&self, source: &Key, destination: &Key) -> AppResult<()> {
        let mut data = self.data.write().await;
        let content = data
            .remove(source)
            .ok_or_else(|| AppError::NotFound(format!("No value for key: {source}")))?;
        data.insert(destination.clone(), content);
        Ok(())
    }

    async fn list(&self, prefix: &Key) -> AppResult<Vec<Key>> {
        Ok(self
            .data
            .read()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn lock(&self, key: &Key) -> OwnedMutexGuard<()> {
        self.locks.lock(key).await
    }
}
