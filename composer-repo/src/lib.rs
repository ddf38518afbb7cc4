//! # Composer Repository Server
//!
//! A package repository speaking the Composer protocol. It hosts packages
//! published as raw manifests or as ZIP archives, and can act as a caching
//! proxy in front of an upstream registry such as Packagist.
//!
//! ## Features
//!
//! - **Registry maintenance**: every publish updates the global
//!   `packages.json` and the per-package `vendor/package.json`
//! - **Archive publishing**: the embedded `composer.json` is stamped with the
//!   version and rewritten in place; the registry gets a `dist` pointer
//! - **Upstream proxy**: upstream metadata is cached with a freshness window
//!   and merged with locally hosted versions
//!
//! ## Key Modules
//!
//! - [`repository`]: publish path and registry reads
//! - [`packages`], [`package`], [`name`]: registry documents and manifests
//! - [`archive`]: manifest extraction and rewriting for ZIP archives
//! - [`proxy`]: cache-aside upstream loading and merging
//! - [`storage`]: key/value storage with per-key exclusive sections
//! - [`server`]: HTTP routes
//! - [`config`], [`state`], [`error`]: wiring and error responses

pub mod archive;
pub mod config;
pub mod error;
pub mod name;
pub mod package;
pub mod packages;
pub mod proxy;
pub mod repository;
pub mod server;
pub mod state;
pub mod storage;
pub mod upstream;

// Re-export key types for convenience
pub use archive::{Archive, ArchiveName, Zip};
pub use config::Config;
pub use error::{ApiErrorResponse, AppError, AppResult, ErrorCode};
pub use name::PackageName;
pub use package::Package;
pub use packages::Packages;
pub use proxy::CachedProxy;
pub use repository::Repository;
pub use server::{create_router, run_server};
pub use state::{AppState, SuccessResponse};
pub use upstream::{UpstreamClient, UpstreamConfig};
