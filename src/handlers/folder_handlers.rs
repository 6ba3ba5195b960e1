//! HTTP handlers for folder operations.
//!
//! Thin layer over `DriveService`: deserialize, call, serialize. Everything
//! interesting (ownership checks, name collisions, the cascade delete)
//! happens in the service.

use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::services::drive_service::DriveService;
use crate::storage::BlobStore;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    pub name: String,
    /// Defaults to the caller's Home folder when omitted.
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RenameFolderRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteFolderResponse {
    pub success: bool,
    pub deleted_files: usize,
    pub deleted_folders: usize,
    pub freed_space: i64,
}

/// POST `/folders` — create a folder.
pub async fn create_folder<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CreateFolderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let folder = service
        .create_folder(user.id, &req.name, req.parent_id)
        .await?;
    Ok((StatusCode::CREATED, Json(folder)))
}

/// GET `/folders` — all folders owned by the caller.
pub async fn list_folders<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.list_folders(user.id).await?))
}

/// GET `/folders/home` — the caller's root folder.
pub async fn home_folder<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.home_folder(user.id).await?))
}

/// GET `/folders/{id}/contents` — subfolders and files, sorted by name.
pub async fn folder_contents<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.folder_contents(user.id, id).await?))
}

/// GET `/folders/{id}/stats` — pre-delete preview counts.
pub async fn folder_stats<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.folder_stats(user.id, id).await?))
}

/// PATCH `/folders/{id}` — rename.
pub async fn rename_folder<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameFolderRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.rename_folder(user.id, id, &req.name).await?))
}

/// POST `/folders/{id}/star` — toggle the star flag.
pub async fn toggle_folder_star<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.toggle_folder_star(user.id, id).await?))
}

/// DELETE `/folders/{id}` — cascade delete the folder and its contents.
pub async fn delete_folder<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = service.delete_folder(user.id, id).await?;
    Ok(Json(DeleteFolderResponse {
        success: true,
        deleted_files: outcome.deleted_files,
        deleted_folders: outcome.deleted_folders,
        freed_space: outcome.freed_space,
    }))
}

/// GET `/starred` — starred folders and files, most recently touched first.
pub async fn starred_items<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.starred_items(user.id).await?))
}
