//! # Registry Documents
//!
//! A registry document has the shape
//!
//! ```json
//! { "packages": { "vendor/package": { "1.0.0": { ...manifest... } } } }
//! ```
//!
//! Two of them are kept up to date on every publish: the global
//! `packages.json` and the per-package `vendor/package.json`.
//! [`Packages`] is an immutable value over the serialized bytes; adding a
//! version yields a new value that the caller persists with [`Packages::save`].

use crate::error::{AppError, AppResult};
use crate::package::Package;
use crate::storage::{Key, Storage};
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::debug;

const ATTRIBUTE: &str = "packages";

/// Serialized registry document.
#[derive(Debug, Clone, PartialEq)]
pub struct Packages {
    content: Bytes,
}

impl Default for Packages {
    fn default() -> Self {
        Self::empty()
    }
}

impl Packages {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// `{"packages":{}}`
    pub fn empty() -> Self {
        Self::new(Bytes::from_static(b"{\"packages\":{}}"))
    }

    /// Add `pack` under its name and effective version, which is the
    /// manifest's own `version` or else `default_version`.
    ///
    /// Sibling versions are kept; an existing entry for the same version is
    /// replaced.
    pub fn add(&self, pack: &Package, default_version: Option<&str>) -> AppResult<Packages> {
        let mut json = self.json()?;
        let packages = match json.get_mut(ATTRIBUTE) {
            Some(Value::Object(packages)) => packages,
            _ => {
                return Err(AppError::InvalidContent(
                    "Bad content, no 'packages' object found".to_string(),
                ))
            }
        };

        let name = pack.name()?.to_string();
        let version = pack.version(default_version).ok_or_else(|| {
            AppError::InvalidContent(format!("Bad package, no 'version' found for '{name}'."))
        })?;

        let versions = packages
            .entry(name.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !versions.is_object() {
            *versions = Value::Object(Map::new());
        }
        if let Value::Object(versions) = versions {
            versions.insert(version.clone(), Value::Object(pack.json().clone()));
        }

        debug!(package = %name, version = %version, "Added version to registry document");
        Ok(Packages::new(serde_json::to_vec(&json)?))
    }

    /// Write the document at `key`.
    pub async fn save<S>(&self, storage: &S, key: &Key) -> AppResult<()>
    where
        S: Storage + ?Sized,
    {
        storage.save(key, self.content.clone()).await
    }

    /// Raw serialized document.
    pub fn content(&self) -> Bytes {
        self.content.clone()
    }

    /// Parsed top-level object.
    pub fn json(&self) -> AppResult<Map<String, Value>> {
        match serde_json::from_slice::<Value>(&self.content)? {
            Value::Object(json) => Ok(json),
            _ => Err(AppError::InvalidContent(
                "Bad content, registry document is not a JSON object".to_string(),
            )),
        }
    }

    /// Versions registered for `name`, sorted.
    pub fn versions(&self, name: &str) -> AppResult<Vec<String>> {
        let json = self.json()?;
        let mut versions: Vec<String> = json
            .get(ATTRIBUTE)
            .and_then(|packages| packages.get(name))
            .and_then(Value::as_object)
            .map(|versions| versions.keys().cloned().collect())
            .unwrap_or_default();
        versions.sort();
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn package(json: Value) -> Package {
        Package::from_slice(json.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_add_to_empty() {
        let pkgs = Packages::empty()
            .add(
                &package(json!({"name": "vendor/package", "version": "1.2.0"})),
                None,
            )
            .unwrap();
        assert_eq!(pkgs.versions("vendor/package").unwrap(), vec!["1.2.0"]);
    }

    #[test]
    fn test_add_preserves_sibling_versions() {
        let existing = Packages::new(r#"{"packages":{"vendor/package":{"1.1.0":{}}}}"#);
        let pkgs = existing
            .add(&package(json!({"name": "vendor/package"})), Some("1.1.2"))
            .unwrap();
        assert_eq!(
            pkgs.versions("vendor/package").unwrap(),
            vec!["1.1.0", "1.1.2"]
        );
        assert_eq!(
            pkgs.json().unwrap()["packages"]["vendor/package"]["1.1.0"],
            json!({})
        );
    }

    #[test]
    fn test_add_same_version_overwrites() {
        let first = package(json!({"name": "a/b", "version": "1.0.0", "description": "old"}));
        let second = package(json!({"name": "a/b", "version": "1.0.0", "description": "new"}));
        let pkgs = Packages::new(r#"{"packages":{"a/b":{"0.9.0":{}}}}"#)
            .add(&first, None)
            .unwrap()
            .add(&second, None)
            .unwrap();
        let json = pkgs.json().unwrap();
        assert_eq!(json["packages"]["a/b"]["1.0.0"]["description"], "new");
        assert_eq!(pkgs.versions("a/b").unwrap(), vec!["0.9.0", "1.0.0"]);
    }

    #[test]
    fn test_add_keeps_other_packages() {
        let pkgs = Packages::new(r#"{"packages":{"psr/log":{"1.0.0":{}}}}"#)
            .add(&package(json!({"name": "a/b", "version": "2.0.0"})), None)
            .unwrap();
        assert_eq!(pkgs.versions("psr/log").unwrap(), vec!["1.0.0"]);
        assert_eq!(pkgs.versions("a/b").unwrap(), vec!["2.0.0"]);
    }

    #[test]
    fn test_add_fails_without_packages_attribute() {
        let pack = package(json!({"name": "a/b", "version": "1.0.0"}));
        for doc in [r#"{}"#, r#"{"packages":null}"#] {
            let err = Packages::new(doc).add(&pack, None).unwrap_err();
            assert!(matches!(err, AppError::InvalidContent(_)), "{doc}");
        }
    }

    #[test]
    fn test_add_fails_without_version() {
        let err = Packages::empty()
            .add(&package(json!({"name": "a/b"})), None)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidContent(_)));
    }

    #[test]
    fn test_add_leaves_original_untouched() {
        let original = Packages::empty();
        let _ = original
            .add(&package(json!({"name": "a/b", "version": "1.0.0"})), None)
            .unwrap();
        assert_eq!(original.content(), Packages::empty().content());
    }

    #[tokio::test]
    async fn test_save_writes_content() {
        let storage = InMemoryStorage::new();
        let key = Key::new("packages.json");
        let pkgs = Packages::empty()
            .add(&package(json!({"name": "a/b", "version": "1.0.0"})), None)
            .unwrap();
        pkgs.save(&storage, &key).await.unwrap();
        assert_eq!(storage.value(&key).await.unwrap(), pkgs.content());
    }
}
