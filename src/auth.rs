//! Request authentication.
//!
//! The service does not implement an auth protocol of its own; callers
//! present an opaque bearer token handed out at provisioning time, and the
//! extractor resolves it to the owning account. Every folder and file
//! argument downstream is scoped to that account.

use crate::errors::AppError;
use crate::models::user::User;
use crate::services::drive_service::DriveService;
use crate::storage::BlobStore;
use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

/// The authenticated caller, resolved from `Authorization: Bearer <token>`.
pub struct CurrentUser(pub User);

impl<B: BlobStore> FromRequestParts<DriveService<B>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &DriveService<B>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("missing bearer token"))?;

        match state.user_by_token(token).await? {
            Some(user) => Ok(CurrentUser(user)),
            None => Err(AppError::unauthorized("invalid access token")),
        }
    }
}
