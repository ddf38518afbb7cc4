//! A single package version manifest (`composer.json` content).

use crate::error::{AppError, AppResult};
use crate::name::PackageName;
use serde_json::{Map, Value};

/// Manifest of one package version.
///
/// Values are immutable: the `with_*` methods return a new manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    json: Map<String, Value>,
}

impl Package {
    /// Parse manifest bytes. The document must be a JSON object.
    pub fn from_slice(content: &[u8]) -> AppResult<Self> {
        match serde_json::from_slice::<Value>(content)? {
            Value::Object(json) => Ok(Self { json }),
            _ => Err(AppError::InvalidContent(
                "Bad package, manifest is not a JSON object".to_string(),
            )),
        }
    }

    pub fn from_json(json: Map<String, Value>) -> Self {
        Self { json }
    }

    /// Mandatory `name` field.
    pub fn name(&self) -> AppResult<PackageName> {
        let name = self.mandatory_string("name")?;
        PackageName::parse(name)
    }

    /// The manifest's own `version`, falling back to `default`.
    pub fn version(&self, default: Option<&str>) -> Option<String> {
        self.json
            .get("version")
            .and_then(Value::as_str)
            .or(default)
            .map(str::to_string)
    }

    pub fn json(&self) -> &Map<String, Value> {
        &self.json
    }

    pub fn to_bytes(&self) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.json)?)
    }

    /// Copy with `version` added or overwritten.
    pub fn with_version(&self, version: &str) -> Self {
        let mut json = self.json.clone();
        json.insert("version".to_string(), Value::String(version.to_string()));
        Self { json }
    }

    /// Copy with a zip `dist` pointer at `url`.
    pub fn with_dist(&self, url: &str) -> Self {
        let mut dist = Map::new();
        dist.insert("url".to_string(), Value::String(url.to_string()));
        dist.insert("type".to_string(), Value::String("zip".to_string()));
        let mut json = self.json.clone();
        json.insert("dist".to_string(), Value::Object(dist));
        Self { json }
    }

    fn mandatory_string(&self, field: &str) -> AppResult<&str> {
        self.json
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::InvalidContent(format!("Bad package, no '{field}' found.")))
    }
}
