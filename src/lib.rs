//! Better Drive — a personal cloud file-storage service.
//!
//! Metadata (users, folder tree, file rows, storage ledger) lives in SQLite;
//! payloads live in a pluggable blob store. The library target exists so the
//! integration tests can build the full router against an in-memory database
//! and a fake blob store.

use axum::{Extension, Router};

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;

use config::AppConfig;
use services::drive_service::DriveService;
use storage::BlobStore;

/// Assemble the application router around a service and its config.
pub fn app<B: BlobStore>(service: DriveService<B>, config: AppConfig) -> Router {
    routes::routes::routes::<B>()
        .layer(Extension(config))
        .with_state(service)
}
