//! Represents a folder — a node in a user's drive tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A folder in the drive hierarchy.
///
/// Folders form a strict tree per user, rooted at a single "Home" folder
/// whose `parent_id` is `None`. Names are unique among siblings of the same
/// owner. Deleting a folder cascades to all descendant folders and files
/// through the schema's foreign-key rules.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Folder {
    /// Unique identifier for this folder.
    pub id: Uuid,

    /// Folder name (unique among siblings).
    pub name: String,

    /// Owning account.
    pub user_id: Uuid,

    /// Parent folder; `None` only for the Home root.
    pub parent_id: Option<Uuid>,

    /// Whether the user has starred this folder.
    pub is_starred: bool,

    /// When this folder was created.
    pub created_at: DateTime<Utc>,

    /// Bumped on rename and star toggles.
    pub updated_at: DateTime<Utc>,
}
