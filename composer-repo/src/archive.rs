//! # Package Archives
//!
//! Packages can be published as archives that embed their `composer.json`.
//! The [`Archive`] trait exposes the two operations the repository needs:
//! reading the embedded manifest and rebuilding the archive with a new
//! manifest. [`Zip`] is the only format today.
//!
//! Rewriting rebuilds the whole archive: every entry is raw-copied (no
//! recompression) except the manifest, which is written with its new content
//! under the same name and at the same position.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::io::{Cursor, Read, Write};
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// File name of the manifest inside an archive.
pub const MANIFEST: &str = "composer.json";

/// Largest manifest accepted from an archive.
pub const MAX_MANIFEST_SIZE: u64 = 4 * 1024 * 1024;

/// Upload path pattern: `<name>-<version>.zip`.
static ARCHIVE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<full>(?P<name>[a-z0-9_.\-]*)-(?P<version>v?\d+\.\d+\.\d+[-\w]*)\.zip)$")
        .expect("Archive name regex should compile - this is a static pattern")
});

/// Full file name and version of an uploaded archive, e.g. `log-1.1.3.zip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    full: String,
    version: String,
}

impl ArchiveName {
    pub fn new(full: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            full: full.into(),
            version: version.into(),
        }
    }

    /// Parse an upload file name such as `log-1.1.3.zip`.
    pub fn parse(file_name: &str) -> AppResult<Self> {
        let caps = ARCHIVE_NAME_REGEX.captures(file_name).ok_or_else(|| {
            AppError::BadRequest(format!(
                "Archive name should look like '<name>-<version>.zip': '{file_name}'"
            ))
        })?;
        Ok(Self::new(&caps["full"], &caps["version"]))
    }

    pub fn full(&self) -> &str {
        &self.full
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Archive format capable of carrying a package manifest.
#[async_trait]
pub trait Archive: Send + Sync {
    /// Name of the archive being processed.
    fn name(&self) -> &ArchiveName;

    /// Extract and parse the embedded manifest.
    async fn manifest_from(&self, content: Bytes) -> AppResult<Map<String, Value>>;

    /// Rebuild the archive with the manifest replaced by `manifest`.
    async fn with_replaced_manifest(&self, content: Bytes, manifest: Bytes) -> AppResult<Bytes>;
}

/// ZIP archive.
#[derive(Debug, Clone)]
pub struct Zip {
    name: ArchiveName,
}

impl Zip {
    pub fn new(name: ArchiveName) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Archive for Zip {
    fn name(&self) -> &ArchiveName {
        &self.name
    }

    async fn manifest_from(&self, content: Bytes) -> AppResult<Map<String, Value>> {
        let bytes = run_blocking(move || read_entry(&content, MANIFEST)).await?;
        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(json) => Ok(json),
            _ => Err(AppError::InvalidContent(format!(
                "'{MANIFEST}' is not a JSON object"
            ))),
        }
    }

    async fn with_replaced_manifest(&self, content: Bytes, manifest: Bytes) -> AppResult<Bytes> {
        let archive = self.name.full.clone();
        let rebuilt = run_blocking(move || replace_entry(&content, MANIFEST, &manifest)).await?;
        info!(archive = %archive, size = rebuilt.len(), "Rebuilt archive with new manifest");
        Ok(rebuilt)
    }
}

async fn run_blocking<T, F>(op: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| AppError::InternalError(format!("Archive task failed: {e}")))?
}

/// Whether the entry's base name (ignoring directories) is `file`.
fn matches_file(entry_name: &str, file: &str) -> bool {
    entry_name.rsplit('/').next() == Some(file)
}

/// Decompress the first entry whose base name is `file`.
fn read_entry(content: &[u8], file: &str) -> AppResult<Vec<u8>> {
    let mut zip = ZipArchive::new(Cursor::new(content))?;
    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        if matches_file(entry.name(), file) {
            debug!(entry = %entry.name(), size = entry.size(), "Found manifest in archive");
            // declared sizes come from the uploader and are not trusted
            if entry.size() > MAX_MANIFEST_SIZE {
                return Err(too_large(file));
            }
            let mut bytes = Vec::new();
            entry
                .by_ref()
                .take(MAX_MANIFEST_SIZE + 1)
                .read_to_end(&mut bytes)?;
            if bytes.len() as u64 > MAX_MANIFEST_SIZE {
                return Err(too_large(file));
            }
            return Ok(bytes);
        }
    }
    Err(AppError::InvalidContent(format!("'{file}' file was not found")))
}

fn too_large(file: &str) -> AppError {
    AppError::InvalidContent(format!(
        "'{file}' is larger than {MAX_MANIFEST_SIZE} bytes"
    ))
}

/// Copy every entry to a new archive, replacing the content of the entry
/// whose base name is `file`.
fn replace_entry(content: &[u8], file: &str, replacement: &[u8]) -> AppResult<Bytes> {
    let mut source = ZipArchive::new(Cursor::new(content))?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(content.len())));
    let mut replaced = false;

    for index in 0..source.len() {
        let entry = source.by_index(index)?;
        if !replaced && matches_file(entry.name(), file) {
            let name = entry.name().to_string();
            // only stored and deflated entries can be written back
            let method = match entry.compression() {
                CompressionMethod::Stored => CompressionMethod::Stored,
                _ => CompressionMethod::Deflated,
            };
            let mut options = FileOptions::default()
                .compression_method(method)
                .last_modified_time(entry.last_modified());
            if let Some(mode) = entry.unix_mode() {
                options = options.unix_permissions(mode);
            }
            drop(entry);
            writer.start_file(name, options)?;
            writer.write_all(replacement)?;
            replaced = true;
        } else {
            writer.raw_copy_file(entry)?;
        }
    }

    if !replaced {
        return Err(AppError::InvalidContent(format!("'{file}' file was not found")));
    }
    let cursor = writer.finish()?;
    Ok(Bytes::from(cursor.into_inner()))
}
