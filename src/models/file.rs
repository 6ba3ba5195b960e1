//! Represents a file stored in a folder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single file in a user's drive.
///
/// The row stores metadata only; the payload lives in the blob store under
/// `storage_key`. Every file belongs to exactly one folder, and its `size`
/// is counted against the owner's storage ledger.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct File {
    /// Unique identifier for this file.
    pub id: Uuid,

    /// File name (unique within its folder).
    pub name: String,

    /// Size in bytes.
    pub size: i64,

    /// Content type (MIME type).
    pub mime_type: String,

    /// URL the payload can be fetched from.
    pub url: String,

    /// Opaque key addressing the payload in the blob store.
    pub storage_key: String,

    /// Owning account.
    pub user_id: Uuid,

    /// Folder this file lives in.
    pub folder_id: Uuid,

    /// Whether the user has starred this file.
    pub is_starred: bool,

    /// When this file was registered.
    pub created_at: DateTime<Utc>,

    /// Bumped on rename and star toggles.
    pub updated_at: DateTime<Utc>,
}
