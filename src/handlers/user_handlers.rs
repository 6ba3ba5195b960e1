//! HTTP handlers for account operations.

use crate::auth::CurrentUser;
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::services::drive_service::DriveService;
use crate::storage::BlobStore;
use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
}

/// POST `/internal/users` — provision an account and its Home folder.
///
/// Guarded by the configured admin token; provisioning is disabled entirely
/// when no token is configured.
pub async fn create_user<B: BlobStore>(
    State(service): State<DriveService<B>>,
    Extension(config): Extension<AppConfig>,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let Some(expected) = config.admin_token.as_deref() else {
        return Err(AppError::forbidden("user provisioning is disabled"));
    };
    let presented = headers
        .get("x-admin-token")
        .and_then(|value| value.to_str().ok());
    if presented != Some(expected) {
        return Err(AppError::forbidden("invalid admin token"));
    }

    let user = service.create_user(&req.name).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET `/me/storage` — quota ledger summary for the caller.
pub async fn storage_info<B: BlobStore>(
    State(service): State<DriveService<B>>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(service.storage_info(user.id).await?))
}
