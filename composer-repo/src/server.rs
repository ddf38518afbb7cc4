//! HTTP server setup and route handlers.
//!
//! Hosted mode serves the local registries and accepts publishes:
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/packages.json` | global registry |
//! | GET | `/p/{vendor}/{package}.json` | per-package registry |
//! | PUT | `/?version=..` | publish a raw manifest |
//! | PUT | `/{name}-{version}.zip` | publish an archive |
//! | GET | `/artifacts/{file}` | download a published archive |
//!
//! Proxy mode (a `proxy` section in the configuration) serves
//! `/packages.json` as a pointer to `/p2/%package%.json` and answers
//! `GET /p2/{vendor}/{package}.json` with the local registry merged with the
//! cached upstream document. Both modes expose `GET /health`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::archive::{ArchiveName, Zip};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::name::PackageName;
use crate::proxy::{requested_name, ALL_PACKAGES_DOCUMENT};
use crate::repository::ARTIFACTS;
use crate::state::{AppState, SuccessResponse};
use crate::storage::{FileStorage, Key};

/// Build the router for `state`, choosing hosted or proxy routes.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_size_bytes();

    let router = Router::new().route("/health", get(health_handler));
    let router = if state.is_proxy() {
        router
            .route("/packages.json", get(proxy_all_packages))
            .route("/p2/{vendor}/{file}", get(proxy_package))
    } else {
        router
            .route("/packages.json", get(all_packages))
            .route("/p/{vendor}/{file}", get(package_metadata))
            .route("/", put(add_json))
            .route("/{file}", put(add_archive))
            .route("/artifacts/{file}", get(download_artifact))
    };

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Start the server described by `config` and serve until shutdown.
pub async fn run_server(config: Config) -> Result<()> {
    let host = config.server.host.clone();
    let port = config.server.port;

    if let Some(prefix) = &config.repository.url_prefix {
        url::Url::parse(prefix).map_err(|e| {
            error!(url_prefix = %prefix, error = %e, "Invalid url prefix");
            anyhow::anyhow!("Invalid url prefix {prefix}: {e}")
        })?;
    }

    let data_dir = config.storage.data_dir.clone();
    tokio::fs::create_dir_all(&data_dir).await?;
    info!(data_dir = %data_dir.display(), "Using data directory");

    let storage = Arc::new(FileStorage::new(data_dir));
    let state = AppState::from_config(config, storage)?;
    let mode = if state.is_proxy() { "proxy" } else { "hosted" };
    let app = create_router(state);

    let addr: SocketAddr = format!("{host}:{port}").parse().map_err(|e| {
        error!(host = %host, port = %port, error = %e, "Invalid socket address");
        anyhow::anyhow!("Invalid socket address {host}:{port}: {e}")
    })?;

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        error!(addr = %addr, error = %e, "Failed to bind to address");
        anyhow::anyhow!("Failed to bind to {host}:{port}: {e}")
    })?;

    info!(addr = %addr, mode = mode, "Composer repository listening");
    axum::serve(listener, app).await.map_err(|e| {
        error!(error = %e, "Server error");
        anyhow::anyhow!("Server error: {e}")
    })?;

    Ok(())
}

fn json_response(content: Bytes) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        content,
    )
        .into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "composer-repo",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn all_packages(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    let packages = state
        .repository
        .packages()
        .await?
        .ok_or_else(|| AppError::NotFound("No packages published yet".to_string()))?;
    Ok(json_response(packages.content()))
}

async fn package_metadata(
    State(state): State<Arc<AppState>>,
    Path((vendor, file)): Path<(String, String)>,
) -> AppResult<Response> {
    let package = file
        .strip_suffix(".json")
        .ok_or_else(|| AppError::NotFound(format!("Not found: /p/{vendor}/{file}")))?;
    let name = PackageName::parse(&format!("{vendor}/{package}"))?;
    let packages = state
        .repository
        .packages_for(&name)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Package not found: {name}")))?;
    Ok(json_response(packages.content()))
}

#[derive(Deserialize)]
struct PublishQuery {
    version: Option<String>,
}

async fn add_json(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PublishQuery>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    state
        .repository
        .add_json(body, query.version.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse {
            message: "Package published".to_string(),
        }),
    ))
}

async fn add_archive(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let archive = Zip::new(ArchiveName::parse(&file)?);
    state.repository.add_archive(&archive, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(SuccessResponse {
            message: format!("Archive {file} published"),
        }),
    ))
}

async fn download_artifact(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> AppResult<Response> {
    let name = ArchiveName::parse(&file)?;
    let content = state
        .repository
        .value(&Key::from_parts([ARTIFACTS, name.full()]))
        .await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/zip")],
        content,
    )
        .into_response())
}

async fn proxy_all_packages() -> Response {
    json_response(Bytes::from_static(ALL_PACKAGES_DOCUMENT.as_bytes()))
}

async fn proxy_package(
    State(state): State<Arc<AppState>>,
    Path((vendor, file)): Path<(String, String)>,
) -> AppResult<Response> {
    let proxy = state
        .proxy
        .as_ref()
        .ok_or_else(|| AppError::NotFound("Proxy is not configured".to_string()))?;
    let name = requested_name(&vendor, &file)?;

    match proxy.package(&name).await {
        Ok(Some(content)) => Ok(json_response(content)),
        Ok(None) => Err(AppError::NotFound(format!("Package not found: {name}"))),
        Err(e) => {
            warn!(package = %name, error = %e, "Failed to build proxied metadata");
            Err(AppError::NotFound(format!("Package not found: {name}")))
        }
    }
}
