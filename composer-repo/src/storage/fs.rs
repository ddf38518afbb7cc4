use super::{Key, KeyLocks, Storage};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Storage backed by a directory on the local filesystem.
///
/// A key `vendor/package.json` is stored at `<root>/vendor/package.json`.
/// Writes go to a temporary sibling file first and are renamed into place,
/// so readers never observe a partially written document.
pub struct FileStorage {
    root: PathBuf,
    locks: KeyLocks,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: KeyLocks::new(),
        }
    }

    fn path(&self, key: &Key) -> AppResult<PathBuf> {
        if key.as_str().is_empty() {
            return Err(AppError::BadRequest("Storage key cannot be empty".to_string()));
        }
        if key
            .as_str()
            .split('/')
            .any(|part| part == ".." || part == "." || part.contains('\\'))
        {
            warn!(key = %key, "Rejected storage key with unsafe segment");
            return Err(AppError::BadRequest(format!(
                "Storage key contains unsafe path segment: {key}"
            )));
        }
        Ok(self.root.join(key.as_str()))
    }
}

/// Ensure parent directory exists
async fn create_parent(path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
        debug!(parent = %parent.display(), "Created parent directory");
    }
    Ok(())
}

fn not_found(key: &Key) -> AppError {
    AppError::NotFound(format!("No value for key: {key}"))
}

#[async_trait]
impl Storage for FileStorage {
    async fn exists(&self, key: &Key) -> AppResult<bool> {
        let path = self.path(key)?;
        match fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn value(&self, key: &Key) -> AppResult<Bytes> {
        let path = self.path(key)?;
        match fs::read(&path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "File not found");
                Err(not_found(key))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &Key, content: Bytes) -> AppResult<()> {
        let path = self.path(key)?;
        create_parent(&path).await?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&tmp, &content).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        info!(
            path = %path.display(),
            size = content.len(),
            "File saved successfully"
        );
        Ok(())
    }

    async fn delete(&self, key: &Key) -> AppResult<()> {
        let path = self.path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "File deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(key)),
            Err(e) => Err(e.into()),
        }
    }

    async fn move_to(&self, source: &Key, destination: &Key) -> AppResult<()> {
        let from = self.path(source)?;
        let to = self.path(destination)?;
        if !self.exists(source).await? {
            return Err(not_found(source));
        }
        create_parent(&to).await?;
        fs::rename(&from, &to).await?;
        // drop the source directory if the move left it empty
        if let Some(parent) = from.parent().filter(|parent| *parent != self.root) {
            let _ = fs::remove_dir(parent).await;
        }
        debug!(from = %from.display(), to = %to.display(), "File moved");
        Ok(())
    }

    async fn list(&self, prefix: &Key) -> AppResult<Vec<Key>> {
        let start = if prefix.as_str().is_empty() {
            self.root.clone()
        } else {
            self.path(prefix)?
        };
        if fs::metadata(&start).await.map(|m| m.is_file()).unwrap_or(false) {
            return Ok(vec![prefix.clone()]);
        }

        let mut keys = Vec::new();
        let mut pending = vec![start];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    let key = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().to_string())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(Key::new(key));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn lock(&self, key: &Key) -> OwnedMutexGuard<()> {
        self.locks.lock(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_creates_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        let key = Key::new("psr/log.json");

        storage
            .save(&key, Bytes::from_static(b"{\"packages\":{}}"))
            .await
            .unwrap();

        let on_disk = std::fs::read(temp_dir.path().join("psr/log.json")).unwrap();
        assert_eq!(on_disk, b"{\"packages\":{}}");
        assert!(storage.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_value_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        let key = Key::new("vendor/package.json");

        assert!(!storage.exists(&key).await.unwrap());
        assert!(matches!(
            storage.value(&key).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            storage.delete(&key).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_move_and_list() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        let tmp = Key::new("0b7c/log-1.1.3.zip");
        let dest = Key::new("artifacts/log-1.1.3.zip");

        storage.save(&tmp, Bytes::from_static(b"zip")).await.unwrap();
        storage.move_to(&tmp, &dest).await.unwrap();

        assert!(!storage.exists(&tmp).await.unwrap());
        assert!(!temp_dir.path().join("0b7c").exists());
        assert_eq!(storage.value(&dest).await.unwrap(), Bytes::from_static(b"zip"));
        assert_eq!(storage.list(&Key::new("artifacts")).await.unwrap(), vec![dest]);
        assert!(storage.list(&Key::new("missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileStorage::new(temp_dir.path());
        let key = Key::new("artifacts/../../etc/passwd");
        assert!(matches!(
            storage.save(&key, Bytes::new()).await,
            Err(AppError::BadRequest(_))
        ));
    }
}
