//! Represents a drive account and its storage ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user account.
///
/// `storage_used` is a running ledger: it always equals the byte sum of the
/// user's current files, and is adjusted in the same transaction as every
/// file insert or delete.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct User {
    /// Unique identifier for this account.
    pub id: Uuid,

    /// Display name.
    pub name: String,

    /// Bearer credential presented in the `Authorization` header.
    pub access_token: String,

    /// Cumulative size in bytes of all files this user currently owns.
    pub storage_used: i64,

    /// When this account was created.
    pub created_at: DateTime<Utc>,
}

/// Storage ledger summary returned by `GET /me/storage`.
#[derive(Serialize, Deserialize, Debug)]
pub struct StorageInfo {
    /// Bytes currently counted against the quota.
    pub used_bytes: i64,

    /// The fixed quota ceiling.
    pub total_bytes: i64,
}
