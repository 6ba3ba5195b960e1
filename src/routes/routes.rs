//! Defines routes for the drive API.
//!
//! ## Structure
//! - **Folder endpoints**
//!   - `POST   /folders` — create folder (parent defaults to Home)
//!   - `GET    /folders` — list the caller's folders
//!   - `GET    /folders/home` — the caller's root folder
//!   - `GET    /folders/{id}/contents` — subfolders + files
//!   - `GET    /folders/{id}/stats` — pre-delete preview counts
//!   - `PATCH  /folders/{id}` — rename
//!   - `POST   /folders/{id}/star` — toggle star
//!   - `DELETE /folders/{id}` — cascade delete
//!
//! - **File endpoints**
//!   - `POST   /files` — register metadata for a stored payload
//!   - `POST   /files/upload` — streaming upload + register
//!   - `PATCH  /files/{id}` — rename
//!   - `POST   /files/{id}/star` — toggle star
//!   - `DELETE /files/{id}` — delete payload + row
//!   - `GET    /blobs/{*key}` — stream a payload back
//!
//! - **Account endpoints**
//!   - `GET    /me/storage` — quota ledger summary
//!   - `GET    /starred` — starred folders + files
//!   - `POST   /internal/users` — provisioning (admin token)

use crate::{
    handlers::{
        file_handlers::{
            delete_file, download_blob, register_file, rename_file, toggle_file_star, upload_file,
        },
        folder_handlers::{
            create_folder, delete_folder, folder_contents, folder_stats, home_folder, list_folders,
            rename_folder, starred_items, toggle_folder_star,
        },
        health_handlers::{healthz, readyz},
        user_handlers::{create_user, storage_info},
    },
    services::drive_service::DriveService,
    storage::BlobStore,
};
use axum::{
    Router,
    routing::{get, patch, post},
};

/// Build and return the router for all drive routes.
///
/// The router carries shared state (`DriveService`) to all handlers; the
/// blob-store implementation stays a type parameter so tests can plug in
/// the in-memory fake.
pub fn routes<B: BlobStore>() -> Router<DriveService<B>> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz::<B>))
        // account endpoints
        .route("/internal/users", post(create_user::<B>))
        .route("/me/storage", get(storage_info::<B>))
        .route("/starred", get(starred_items::<B>))
        // folder endpoints
        .route("/folders", post(create_folder::<B>).get(list_folders::<B>))
        .route("/folders/home", get(home_folder::<B>))
        .route("/folders/{id}/contents", get(folder_contents::<B>))
        .route("/folders/{id}/stats", get(folder_stats::<B>))
        .route(
            "/folders/{id}",
            patch(rename_folder::<B>).delete(delete_folder::<B>),
        )
        .route("/folders/{id}/star", post(toggle_folder_star::<B>))
        // file endpoints
        .route("/files", post(register_file::<B>))
        .route("/files/upload", post(upload_file::<B>))
        .route(
            "/files/{id}",
            patch(rename_file::<B>).delete(delete_file::<B>),
        )
        .route("/files/{id}/star", post(toggle_file_star::<B>))
        .route("/blobs/{*key}", get(download_blob::<B>))
}
