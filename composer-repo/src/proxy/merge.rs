use crate::error::{AppError, AppResult};
use bytes::Bytes;
use serde_json::{Map, Value};
use tracing::debug;

/// Merges the local registry fragment of one package with the upstream one.
///
/// Local versions are authoritative and kept as they are. Upstream versions
/// missing locally are added with a fresh `uid`, and with `name` when the
/// upstream entry has none. Upstream lists versions as an array while the
/// local registry maps version to manifest; the result uses the map shape.
pub struct MergePackage {
    name: String,
    local: Bytes,
}

impl MergePackage {
    pub fn new(name: impl Into<String>, local: Bytes) -> Self {
        Self {
            name: name.into(),
            local,
        }
    }

    /// `{"packages": {name: {version: entry}}}`, or `None` when neither side
    /// has a version.
    pub fn merge(&self, remote: Option<&[u8]>) -> AppResult<Option<Bytes>> {
        let mut versions = self.local_versions()?;
        let local_count = versions.len();

        if let Some(remote) = remote {
            for entry in self.remote_entries(remote)? {
                let Value::Object(mut entry) = entry else {
                    continue;
                };
                let Some(version) = entry.get("version").and_then(Value::as_str).map(str::to_string)
                else {
                    debug!(package = %self.name, "Skipping upstream entry without version");
                    continue;
                };
                if versions.contains_key(&version) {
                    continue;
                }
                entry
                    .entry("name")
                    .or_insert_with(|| Value::String(self.name.clone()));
                entry.insert(
                    "uid".to_string(),
                    Value::String(uuid::Uuid::new_v4().to_string()),
                );
                versions.insert(version, Value::Object(entry));
            }
        }

        if versions.is_empty() {
            return Ok(None);
        }
        debug!(
            package = %self.name,
            local = local_count,
            remote = versions.len() - local_count,
            "Merged package versions"
        );

        let mut packages = Map::new();
        packages.insert(self.name.clone(), Value::Object(versions));
        let mut merged = Map::new();
        merged.insert("packages".to_string(), Value::Object(packages));
        Ok(Some(Bytes::from(serde_json::to_vec(&merged)?)))
    }

    fn local_versions(&self) -> AppResult<Map<String, Value>> {
        let json: Value = serde_json::from_slice(&self.local)?;
        match json.get("packages").and_then(|packages| packages.get(&self.name)) {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(versions)) => Ok(versions.clone()),
            Some(_) => Err(AppError::InvalidContent(format!(
                "Bad content, versions of '{}' are not an object",
                self.name
            ))),
        }
    }

    fn remote_entries(&self, remote: &[u8]) -> AppResult<Vec<Value>> {
        let mut json: Value = serde_json::from_slice(remote)?;
        match json
            .get_mut("packages")
            .and_then(|packages| packages.get_mut(&self.name))
            .map(Value::take)
        {
            Some(Value::Array(entries)) => Ok(entries),
            _ => Ok(Vec::new()),
        }
    }
}
