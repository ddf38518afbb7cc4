//! # Hosted Repository
//!
//! [`Repository`] owns the publish path. A publish resolves everything it
//! needs (manifest, name, version, rewritten archive) before touching a
//! registry document, so a failed extraction or a missing field never leaves
//! a half-updated registry behind. Once resolved, the global `packages.json`
//! and the per-package `vendor/package.json` are updated concurrently.

use crate::archive::Archive;
use crate::error::{AppError, AppResult};
use crate::name::PackageName;
use crate::package::Package;
use crate::packages::Packages;
use crate::storage::{value_if_exists, Key, Storage};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

/// Key of the registry listing every hosted package.
pub const ALL_PACKAGES: &str = "packages.json";

/// Key prefix of stored archives.
pub const ARTIFACTS: &str = "artifacts";

/// Package registries and artifacts kept in a [`Storage`].
#[derive(Clone)]
pub struct Repository {
    storage: Arc<dyn Storage>,
    url_prefix: Option<String>,
}

impl Repository {
    pub fn new(storage: Arc<dyn Storage>, url_prefix: Option<String>) -> Self {
        Self {
            storage,
            url_prefix,
        }
    }

    /// The global registry, if anything was ever published.
    pub async fn packages(&self) -> AppResult<Option<Packages>> {
        self.registry(&Key::new(ALL_PACKAGES)).await
    }

    /// The registry fragment of one package.
    pub async fn packages_for(&self, name: &PackageName) -> AppResult<Option<Packages>> {
        self.registry(&name.key()).await
    }

    /// Publish a raw manifest.
    ///
    /// `version` is used when the manifest carries no `version` of its own.
    pub async fn add_json(&self, content: Bytes, version: Option<&str>) -> AppResult<()> {
        let pack = Package::from_slice(&content)?;
        let name = pack.name()?;
        let version = pack.version(version).ok_or_else(|| {
            AppError::InvalidContent(format!("Bad package, no 'version' found for '{name}'."))
        })?;

        self.register(&name, &pack, &version).await?;
        info!(package = %name, version = %version, "Published package manifest");
        Ok(())
    }

    /// Publish an archive with an embedded manifest.
    ///
    /// The manifest is stamped with the version from the archive name and
    /// written back into the archive, which is stored under
    /// `artifacts/<file name>`. The registries receive the stamped manifest
    /// plus a `dist` pointer to the stored archive.
    pub async fn add_archive(&self, archive: &dyn Archive, content: Bytes) -> AppResult<()> {
        let prefix = self.url_prefix.as_deref().ok_or_else(|| {
            AppError::Config("Prefix url for `dist` for uploaded archive was empty.".to_string())
        })?;
        let archive_name = archive.name();
        let key = Key::from_parts([ARTIFACTS, archive_name.full()]);

        let manifest = archive.manifest_from(content.clone()).await?;
        let pack = Package::from_json(manifest).with_version(archive_name.version());
        let name = pack.name()?;
        let rewritten = archive
            .with_replaced_manifest(content, Bytes::from(pack.to_bytes()?))
            .await?;

        self.store_artifact(&key, rewritten).await?;

        let url = format!("{}/{}", prefix.trim_end_matches('/'), key);
        let published = pack.with_dist(&url);
        self.register(&name, &published, archive_name.version())
            .await?;
        info!(
            package = %name,
            version = %archive_name.version(),
            archive = %archive_name.full(),
            "Published package archive"
        );
        Ok(())
    }

    /// Read a stored document, e.g. an artifact.
    pub async fn value(&self, key: &Key) -> AppResult<Bytes> {
        self.storage.value(key).await
    }

    async fn registry(&self, key: &Key) -> AppResult<Option<Packages>> {
        Ok(value_if_exists(self.storage.as_ref(), key)
            .await?
            .map(Packages::new))
    }

    /// Add `pack` to the global and the per-package registry.
    async fn register(&self, name: &PackageName, pack: &Package, version: &str) -> AppResult<()> {
        tokio::try_join!(
            self.update(Key::new(ALL_PACKAGES), pack, version),
            self.update(name.key(), pack, version),
        )?;
        Ok(())
    }

    async fn update(&self, key: Key, pack: &Package, version: &str) -> AppResult<()> {
        let current = self.registry(&key).await?.unwrap_or_default();
        let updated = current.add(pack, Some(version))?;
        updated.save(self.storage.as_ref(), &key).await?;
        debug!(key = %key, "Updated registry document");
        Ok(())
    }

    /// Write through a temporary key so a reader never sees a half-written
    /// archive under the final key.
    async fn store_artifact(&self, key: &Key, content: Bytes) -> AppResult<()> {
        let file_name = key.as_str().rsplit('/').next().unwrap_or_default();
        let tmp = Key::from_parts([uuid::Uuid::new_v4().to_string().as_str(), file_name]);
        self.storage.save(&tmp, content).await?;
        if self.storage.exists(key).await? {
            self.storage.delete(key).await?;
        }
        self.storage.move_to(&tmp, key).await?;
        debug!(key = %key, "Stored artifact");
        Ok(())
    }
}
