//! Common test utilities and helpers
//!
//! Shared setup for the HTTP-level tests: servers backed by a temporary data
//! directory, a stub upstream registry, and ZIP fixtures.

#![allow(dead_code)]

use anyhow::Result;
use axum::{extract::Path, http::StatusCode, routing::get, Router};
use axum_test::TestServer;
use bytes::Bytes;
use composer_repo::config::{Config, ProxyConfig};
use composer_repo::storage::FileStorage;
use composer_repo::{create_router, AppState};
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use zip::write::FileOptions;
use zip::ZipWriter;

/// Test server setup result
pub struct TestSetup {
    pub temp_dir: TempDir,
    pub server: TestServer,
}

impl TestSetup {
    pub fn data_path(&self, key: &str) -> std::path::PathBuf {
        self.temp_dir.path().join(key)
    }
}

/// Hosted repository on a temporary data directory.
pub fn create_hosted_setup(url_prefix: Option<&str>) -> Result<TestSetup> {
    let mut config = Config::default();
    config.repository.url_prefix = url_prefix.map(str::to_string);
    create_setup(config)
}

/// Proxy in front of `remote_url` on a temporary data directory.
pub fn create_proxy_setup(remote_url: &str, cache: bool) -> Result<TestSetup> {
    let mut proxy = ProxyConfig::new(remote_url);
    proxy.timeout_secs = 5;
    proxy.cache.enabled = cache;

    let mut config = Config::default();
    config.proxy = Some(proxy);
    create_setup(config)
}

/// Server for an arbitrary configuration; the data directory is always a
/// fresh temporary one.
pub fn create_setup(mut config: Config) -> Result<TestSetup> {
    let temp_dir = TempDir::new()?;
    config.storage.data_dir = temp_dir.path().to_path_buf();

    let storage = Arc::new(FileStorage::new(temp_dir.path()));
    let state = AppState::from_config(config, storage)?;
    let server = TestServer::new(create_router(state))?;

    Ok(TestSetup { temp_dir, server })
}

/// Stub upstream registry serving `p2` documents from a fixed table and
/// counting requests.
pub struct StubUpstream {
    pub url: String,
    hits: Arc<AtomicUsize>,
}

impl StubUpstream {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Serve `documents` (`("vendor/package", json)`) on an ephemeral port.
/// Unknown packages answer 404; `broken/*` answers 500.
pub async fn spawn_upstream(documents: Vec<(&'static str, &'static str)>) -> StubUpstream {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let documents = Arc::new(documents);

    let router = Router::new().route(
        "/p2/{vendor}/{file}",
        get(move |Path((vendor, file)): Path<(String, String)>| {
            let documents = documents.clone();
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if vendor == "broken" {
                    return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
                }
                let name = format!("{vendor}/{}", file.trim_end_matches(".json"));
                match documents.iter().find(|(n, _)| *n == name) {
                    Some((_, doc)) => (StatusCode::OK, doc.to_string()),
                    None => (StatusCode::NOT_FOUND, String::new()),
                }
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    StubUpstream {
        url: format!("http://{addr}"),
        hits,
    }
}

/// ZIP archive with the given `(path, content)` entries.
pub fn build_zip(entries: &[(&str, &str)]) -> Bytes {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}

/// Upstream `p2` document for `psr/log` with versions 1.1.2 and 1.1.3.
pub const PSR_LOG_UPSTREAM: &str = r#"{"packages":{"psr/log":[
    {"name":"psr/log","version":"1.1.3","description":"Common interface for logging libraries"},
    {"version":"1.1.2","description":"Common interface for logging libraries"}
]}}"#;
