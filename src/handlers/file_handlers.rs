//! HTTP handlers for file operations.
//!
//! Uploads stream the request body straight into the blob store; payloads
//! are never buffered in memory. `/blobs/{*key}` serves payloads back under
//! the same capability-style keys the metadata rows carry.

use crate::auth::CurrentUser;
use crate::errors::AppError;
use crate::services::drive_service::{DriveService, RegisterFile};
use crate::storage::BlobStore;
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RegisterFileRequest {
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub url: String,
    pub storage_key: String,
    pub folder_id: Uuid,
}

/// Query params accepted by `POST /files/upload`.
#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub name: String,
    /// Defaults to the caller's Home folder when omitted.
    pub folder_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct RenameFileRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteFileResponse {
    pub success: bool,
    pub deleted_file: DeletedFileBody,
}

#[derive(Debug, Serialize)]
pub struct DeletedFileBody {
    pub name: String,
    pub size: i64,
}

/// POST `/files` — register metadata for an already-stored payload.
pub async fn register_file<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<RegisterFileRequest>,
) -> Result<impl IntoResponse, AppError> {
    let file = service
        .register_file(
            user.id,
            RegisterFile {
                name: req.name,
                size: req.size,
                mime_type: req.mime_type,
                url: req.url,
                storage_key: req.storage_key,
                folder_id: req.folder_id,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(file)))
}

/// POST `/files/upload?name=&folder_id=` — stream a payload in and register it.
pub async fn upload_file<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let file = service
        .upload_file(user.id, params.folder_id, &params.name, &mime_type, stream)
        .await?;
    Ok((StatusCode::CREATED, Json(file)))
}

/// PATCH `/files/{id}` — rename.
pub async fn rename_file<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<RenameFileRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.rename_file(user.id, id, &req.name).await?))
}

/// POST `/files/{id}/star` — toggle the star flag.
pub async fn toggle_file_star<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.toggle_file_star(user.id, id).await?))
}

/// DELETE `/files/{id}` — remove payload, row, and quota charge.
pub async fn delete_file<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let deleted = service.delete_file(user.id, id).await?;
    Ok(Json(DeleteFileResponse {
        success: true,
        deleted_file: DeletedFileBody {
            name: deleted.name,
            size: deleted.size,
        },
    }))
}

/// GET `/blobs/{*key}` — stream a payload back.
///
/// Keys are unguessable, so this behaves like the capability URLs the
/// upstream blob providers hand out; no bearer token is required.
pub async fn download_blob<B: BlobStore>(
    State(service): State<DriveService<B>>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let meta = service
        .file_by_storage_key(&key)
        .await?
        .ok_or_else(|| AppError::not_found("blob not found"))?;
    let reader = service.blobs.get_object(&key).await.map_err(|err| {
        tracing::error!("payload missing for registered key {key}: {err}");
        AppError::not_found("blob not found")
    })?;

    let body = Body::from_stream(ReaderStream::new(reader));
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    Ok(response)
}
