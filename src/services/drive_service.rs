//! DriveService — core drive operations backed by SQLite for metadata and a
//! pluggable [`BlobStore`] for file payloads.
//!
//! The one genuinely delicate piece is folder deletion: descendant folders
//! are collected with an iterative walk, their files' payload keys go to the
//! blob store in a single best-effort batch, and the row cleanup itself is a
//! single cascade delete plus a quota release inside one transaction. The
//! cascade foreign-key rules are the delete predicate; the collected id list
//! only drives blob cleanup and the reported counts, and the stats preview
//! shares the exact same collection logic so preview and delete can never
//! disagree.

use crate::config::{self, MAX_STORAGE_LIMIT};
use crate::models::{file::File, folder::Folder, user::{StorageInfo, User}};
use crate::services::quota;
use crate::storage::BlobStore;
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use serde::Serialize;
use sqlx::{QueryBuilder, SqliteConnection, SqlitePool, sqlite::Sqlite};
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("folder not found")]
    FolderNotFound,
    #[error("file not found")]
    FileNotFound,
    #[error("user not found")]
    UserNotFound,
    #[error("a folder with this name already exists in this location")]
    FolderNameTaken,
    #[error("a file with this name already exists in this folder")]
    FileNameTaken,
    #[error("the Home folder cannot be renamed or deleted")]
    HomeFolderProtected,
    #[error("name must be between 1 and 255 characters")]
    InvalidName,
    #[error("file size must be non-negative")]
    InvalidSize,
    #[error("storage limit exceeded")]
    StorageLimitExceeded,
    #[error("unsupported file type `{0}`")]
    UnsupportedFileType(String),
    #[error("file exceeds the {limit}-byte limit for `{mime_type}`")]
    FileTooLarge { mime_type: String, limit: i64 },
    #[error("blob store error: {0}")]
    BlobStore(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type DriveResult<T> = Result<T, DriveError>;

/// Preview of what a folder deletion would remove.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FolderStats {
    /// Descendant folders, the target itself excluded.
    pub sub_folder_count: usize,
    /// Files in the target folder and every descendant.
    pub file_count: usize,
}

/// Summary returned after a folder deletion.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DeleteFolderOutcome {
    pub deleted_files: usize,
    /// Scope size: the target folder plus all descendants.
    pub deleted_folders: usize,
    pub freed_space: i64,
}

/// Summary returned after a single-file deletion.
#[derive(Debug, Serialize)]
pub struct DeletedFile {
    pub name: String,
    pub size: i64,
}

/// A folder together with its direct children, both sorted by name.
#[derive(Debug, Serialize)]
pub struct FolderContents {
    pub folder: Folder,
    pub folders: Vec<Folder>,
    pub files: Vec<File>,
}

/// Starred folders and files, most recently touched first.
#[derive(Debug, Serialize)]
pub struct StarredItems {
    pub folders: Vec<Folder>,
    pub files: Vec<File>,
}

/// Metadata for a file registration (`POST /files`).
#[derive(Debug)]
pub struct RegisterFile {
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub url: String,
    pub storage_key: String,
    pub folder_id: Uuid,
}

/// Everything a folder deletion touches: the folder-id set (target first),
/// the blob references of every file inside it, and their byte sum.
struct DeletionScope {
    folder_ids: Vec<Uuid>,
    files: Vec<BlobFileRef>,
    total_size: i64,
}

#[derive(sqlx::FromRow)]
struct BlobFileRef {
    storage_key: String,
    size: i64,
}

const FOLDER_COLUMNS: &str =
    "id, name, user_id, parent_id, is_starred, created_at, updated_at";
const FILE_COLUMNS: &str =
    "id, name, size, mime_type, url, storage_key, user_id, folder_id, is_starred, created_at, updated_at";

/// DriveService provides the drive operations behind the HTTP surface:
/// user provisioning, the folder tree, file registration/upload, stars,
/// and the cascading folder delete.
///
/// The blob store is injected so the orchestration can run against an
/// in-memory fake in tests.
#[derive(Clone)]
pub struct DriveService<B: BlobStore> {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Payload store for file contents.
    pub blobs: B,
}

impl<B: BlobStore> DriveService<B> {
    pub fn new(db: Arc<SqlitePool>, blobs: B) -> Self {
        Self { db, blobs }
    }

    // --- users ---

    /// Create an account and its Home root folder in one transaction.
    pub async fn create_user(&self, name: &str) -> DriveResult<User> {
        validate_name(name)?;
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            access_token: Uuid::new_v4().to_string(),
            storage_used: 0,
            created_at: now,
        };
        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO users (id, name, access_token, storage_used, created_at)
             VALUES (?, ?, ?, 0, ?)",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.access_token)
        .bind(user.created_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO folders (id, name, user_id, parent_id, is_starred, created_at, updated_at)
             VALUES (?, 'Home', ?, NULL, 0, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(user)
    }

    /// Resolve a bearer token to its account, if any.
    pub async fn user_by_token(&self, token: &str) -> DriveResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, name, access_token, storage_used, created_at
             FROM users WHERE access_token = ?",
        )
        .bind(token)
        .fetch_optional(&*self.db)
        .await?;
        Ok(user)
    }

    pub async fn storage_info(&self, user_id: Uuid) -> DriveResult<StorageInfo> {
        let used: Option<i64> = sqlx::query_scalar("SELECT storage_used FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&*self.db)
            .await?;
        match used {
            Some(used_bytes) => Ok(StorageInfo {
                used_bytes,
                total_bytes: MAX_STORAGE_LIMIT,
            }),
            None => Err(DriveError::UserNotFound),
        }
    }

    // --- folders ---

    /// Create a folder. With no parent given, the folder lands in the
    /// caller's Home root.
    pub async fn create_folder(
        &self,
        user_id: Uuid,
        name: &str,
        parent_id: Option<Uuid>,
    ) -> DriveResult<Folder> {
        validate_name(name)?;
        let mut tx = self.db.begin().await?;
        let parent = match parent_id {
            Some(id) => fetch_folder(&mut tx, user_id, id).await?,
            None => home_folder_of(&mut tx, user_id).await?,
        };
        ensure_no_sibling_folder(&mut tx, user_id, parent.id, name, None).await?;

        let now = Utc::now();
        let folder = Folder {
            id: Uuid::new_v4(),
            name: name.to_string(),
            user_id,
            parent_id: Some(parent.id),
            is_starred: false,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO folders (id, name, user_id, parent_id, is_starred, created_at, updated_at)
             VALUES (?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(folder.id)
        .bind(&folder.name)
        .bind(folder.user_id)
        .bind(folder.parent_id)
        .bind(folder.created_at)
        .bind(folder.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                DriveError::FolderNameTaken
            } else {
                DriveError::Sqlx(err)
            }
        })?;
        tx.commit().await?;
        Ok(folder)
    }

    /// The caller's Home root folder.
    pub async fn home_folder(&self, user_id: Uuid) -> DriveResult<Folder> {
        let mut conn = self.db.acquire().await?;
        home_folder_of(&mut conn, user_id).await
    }

    /// All folders the caller owns, sorted by name.
    pub async fn list_folders(&self, user_id: Uuid) -> DriveResult<Vec<Folder>> {
        let folders = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders WHERE user_id = ? ORDER BY name ASC"
        ))
        .bind(user_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(folders)
    }

    /// A folder plus its direct subfolders and files, sorted by name.
    pub async fn folder_contents(
        &self,
        user_id: Uuid,
        folder_id: Uuid,
    ) -> DriveResult<FolderContents> {
        let mut conn = self.db.acquire().await?;
        let folder = fetch_folder(&mut conn, user_id, folder_id).await?;
        let folders = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders WHERE parent_id = ? ORDER BY name ASC"
        ))
        .bind(folder_id)
        .fetch_all(&mut *conn)
        .await?;
        let files = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE folder_id = ? ORDER BY name ASC"
        ))
        .bind(folder_id)
        .fetch_all(&mut *conn)
        .await?;
        Ok(FolderContents {
            folder,
            folders,
            files,
        })
    }

    /// Preview of a folder deletion: descendant folder count and the number
    /// of files that would go with them.
    ///
    /// Runs the same scope collection as [`Self::delete_folder`], on a
    /// transaction, so the preview matches what a delete would report.
    pub async fn folder_stats(&self, user_id: Uuid, folder_id: Uuid) -> DriveResult<FolderStats> {
        let mut tx = self.db.begin().await?;
        fetch_folder(&mut tx, user_id, folder_id).await?;
        let scope = deletion_scope(&mut tx, folder_id).await?;
        tx.commit().await?;
        Ok(FolderStats {
            sub_folder_count: scope.folder_ids.len() - 1,
            file_count: scope.files.len(),
        })
    }

    /// Rename a folder. The Home root cannot be renamed.
    pub async fn rename_folder(
        &self,
        user_id: Uuid,
        folder_id: Uuid,
        new_name: &str,
    ) -> DriveResult<Folder> {
        validate_name(new_name)?;
        let mut tx = self.db.begin().await?;
        let mut folder = fetch_folder(&mut tx, user_id, folder_id).await?;
        let Some(parent_id) = folder.parent_id else {
            return Err(DriveError::HomeFolderProtected);
        };
        ensure_no_sibling_folder(&mut tx, user_id, parent_id, new_name, Some(folder_id)).await?;

        let now = Utc::now();
        sqlx::query("UPDATE folders SET name = ?, updated_at = ? WHERE id = ?")
            .bind(new_name)
            .bind(now)
            .bind(folder_id)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    DriveError::FolderNameTaken
                } else {
                    DriveError::Sqlx(err)
                }
            })?;
        tx.commit().await?;
        folder.name = new_name.to_string();
        folder.updated_at = now;
        Ok(folder)
    }

    /// Flip a folder's star flag.
    pub async fn toggle_folder_star(&self, user_id: Uuid, folder_id: Uuid) -> DriveResult<Folder> {
        let mut tx = self.db.begin().await?;
        let mut folder = fetch_folder(&mut tx, user_id, folder_id).await?;
        let now = Utc::now();
        folder.is_starred = !folder.is_starred;
        folder.updated_at = now;
        sqlx::query("UPDATE folders SET is_starred = ?, updated_at = ? WHERE id = ?")
            .bind(folder.is_starred)
            .bind(now)
            .bind(folder_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(folder)
    }

    /// Delete a folder and everything beneath it.
    ///
    /// Ownership mismatch reports the same `FolderNotFound` as absence so
    /// other users' folder ids stay unguessable. Blob removal is one
    /// best-effort batch: if the blob store errors the database cleanup
    /// still goes ahead — an orphaned payload beats a ledger that disagrees
    /// with the table contents. Row removal itself is a single statement on
    /// the target; the cascade rules take out descendants and files.
    pub async fn delete_folder(
        &self,
        user_id: Uuid,
        folder_id: Uuid,
    ) -> DriveResult<DeleteFolderOutcome> {
        let mut tx = self.db.begin().await?;
        let folder = fetch_folder(&mut tx, user_id, folder_id).await?;
        if folder.parent_id.is_none() {
            return Err(DriveError::HomeFolderProtected);
        }
        let scope = deletion_scope(&mut tx, folder_id).await?;

        if !scope.files.is_empty() {
            let keys: Vec<String> = scope
                .files
                .iter()
                .map(|f| f.storage_key.clone())
                .collect();
            if let Err(err) = self.blobs.delete_objects(&keys).await {
                error!(
                    keys = keys.len(),
                    "blob store delete failed during folder deletion: {err}; continuing with database cleanup"
                );
            }
        }

        sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(folder_id)
            .execute(&mut *tx)
            .await?;
        quota::release(&mut tx, user_id, scope.total_size).await?;
        tx.commit().await?;

        Ok(DeleteFolderOutcome {
            deleted_files: scope.files.len(),
            deleted_folders: scope.folder_ids.len(),
            freed_space: scope.total_size,
        })
    }

    // --- files ---

    /// Register an already-stored payload as a file row, charging the quota
    /// in the same transaction.
    pub async fn register_file(&self, user_id: Uuid, input: RegisterFile) -> DriveResult<File> {
        validate_name(&input.name)?;
        if input.size < 0 {
            return Err(DriveError::InvalidSize);
        }
        let cap = config::max_size_for_mime(&input.mime_type)
            .ok_or_else(|| DriveError::UnsupportedFileType(input.mime_type.clone()))?;
        if input.size > cap {
            return Err(DriveError::FileTooLarge {
                mime_type: input.mime_type.clone(),
                limit: cap,
            });
        }

        let mut tx = self.db.begin().await?;
        fetch_folder(&mut tx, user_id, input.folder_id).await?;
        ensure_no_sibling_file(&mut tx, user_id, input.folder_id, &input.name, None).await?;
        quota::charge(&mut tx, user_id, input.size).await?;

        let now = Utc::now();
        let file = File {
            id: Uuid::new_v4(),
            name: input.name,
            size: input.size,
            mime_type: input.mime_type,
            url: input.url,
            storage_key: input.storage_key,
            user_id,
            folder_id: input.folder_id,
            is_starred: false,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO files (id, name, size, mime_type, url, storage_key, user_id, folder_id, is_starred, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)",
        )
        .bind(file.id)
        .bind(&file.name)
        .bind(file.size)
        .bind(&file.mime_type)
        .bind(&file.url)
        .bind(&file.storage_key)
        .bind(file.user_id)
        .bind(file.folder_id)
        .bind(file.created_at)
        .bind(file.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                DriveError::FileNameTaken
            } else {
                DriveError::Sqlx(err)
            }
        })?;
        tx.commit().await?;
        Ok(file)
    }

    /// Stream an upload into the blob store, then register it.
    ///
    /// The quota gate runs before a single byte is accepted; a full drive
    /// never touches the blob store. If registration fails after the payload
    /// was stored, the payload is removed again best-effort.
    pub async fn upload_file<S>(
        &self,
        user_id: Uuid,
        folder_id: Option<Uuid>,
        name: &str,
        mime_type: &str,
        stream: S,
    ) -> DriveResult<File>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        validate_name(name)?;
        if config::max_size_for_mime(mime_type).is_none() {
            return Err(DriveError::UnsupportedFileType(mime_type.to_string()));
        }

        let target = {
            let mut conn = self.db.acquire().await?;
            let folder = match folder_id {
                Some(id) => fetch_folder(&mut conn, user_id, id).await?,
                None => home_folder_of(&mut conn, user_id).await?,
            };
            ensure_no_sibling_file(&mut conn, user_id, folder.id, name, None).await?;
            let used: i64 = sqlx::query_scalar("SELECT storage_used FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await?
                .ok_or(DriveError::UserNotFound)?;
            if used >= MAX_STORAGE_LIMIT {
                return Err(DriveError::StorageLimitExceeded);
            }
            folder.id
        };

        let key = Uuid::new_v4().simple().to_string();
        let blob = self
            .blobs
            .put_object(&key, stream)
            .await
            .map_err(|err| DriveError::BlobStore(err.to_string()))?;

        let registered = self
            .register_file(
                user_id,
                RegisterFile {
                    name: name.to_string(),
                    size: blob.size,
                    mime_type: mime_type.to_string(),
                    url: format!("/blobs/{key}"),
                    storage_key: key.clone(),
                    folder_id: target,
                },
            )
            .await;

        match registered {
            Ok(file) => Ok(file),
            Err(err) => {
                if let Err(cleanup) = self.blobs.delete_objects(&[key]).await {
                    error!("failed to remove payload after aborted upload: {cleanup}");
                }
                Err(err)
            }
        }
    }

    /// Rename a file, checking for a sibling collision first.
    pub async fn rename_file(
        &self,
        user_id: Uuid,
        file_id: Uuid,
        new_name: &str,
    ) -> DriveResult<File> {
        validate_name(new_name)?;
        let mut tx = self.db.begin().await?;
        let mut file = fetch_file(&mut tx, user_id, file_id).await?;
        ensure_no_sibling_file(&mut tx, user_id, file.folder_id, new_name, Some(file_id)).await?;

        let now = Utc::now();
        sqlx::query("UPDATE files SET name = ?, updated_at = ? WHERE id = ?")
            .bind(new_name)
            .bind(now)
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    DriveError::FileNameTaken
                } else {
                    DriveError::Sqlx(err)
                }
            })?;
        tx.commit().await?;
        file.name = new_name.to_string();
        file.updated_at = now;
        Ok(file)
    }

    /// Flip a file's star flag.
    pub async fn toggle_file_star(&self, user_id: Uuid, file_id: Uuid) -> DriveResult<File> {
        let mut tx = self.db.begin().await?;
        let mut file = fetch_file(&mut tx, user_id, file_id).await?;
        let now = Utc::now();
        file.is_starred = !file.is_starred;
        file.updated_at = now;
        sqlx::query("UPDATE files SET is_starred = ?, updated_at = ? WHERE id = ?")
            .bind(file.is_starred)
            .bind(now)
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(file)
    }

    /// Delete a single file.
    ///
    /// Unlike the folder path, a blob-store failure here aborts the whole
    /// operation: with one file there is no aggregate to keep consistent,
    /// so nothing justifies leaving an orphaned payload behind.
    pub async fn delete_file(&self, user_id: Uuid, file_id: Uuid) -> DriveResult<DeletedFile> {
        let mut tx = self.db.begin().await?;
        let file = fetch_file(&mut tx, user_id, file_id).await?;

        self.blobs
            .delete_objects(&[file.storage_key.clone()])
            .await
            .map_err(|err| DriveError::BlobStore(err.to_string()))?;

        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        quota::release(&mut tx, user_id, file.size).await?;
        tx.commit().await?;

        Ok(DeletedFile {
            name: file.name,
            size: file.size,
        })
    }

    /// Look up the file row a payload key belongs to, if any.
    pub async fn file_by_storage_key(&self, key: &str) -> DriveResult<Option<File>> {
        let file = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE storage_key = ?"
        ))
        .bind(key)
        .fetch_optional(&*self.db)
        .await?;
        Ok(file)
    }

    /// Starred folders and files, most recently touched first.
    pub async fn starred_items(&self, user_id: Uuid) -> DriveResult<StarredItems> {
        let folders = sqlx::query_as::<_, Folder>(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE user_id = ? AND is_starred = 1 ORDER BY updated_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&*self.db)
        .await?;
        let files = sqlx::query_as::<_, File>(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE user_id = ? AND is_starred = 1 ORDER BY updated_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(StarredItems { folders, files })
    }
}

// --- helpers shared by the operations above ---

fn validate_name(name: &str) -> DriveResult<()> {
    let len = name.chars().count();
    if len == 0 || len > 255 {
        return Err(DriveError::InvalidName);
    }
    Ok(())
}

/// Fetch a folder, reporting ownership mismatch identically to absence.
async fn fetch_folder(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    folder_id: Uuid,
) -> DriveResult<Folder> {
    let folder = sqlx::query_as::<_, Folder>(&format!(
        "SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?"
    ))
    .bind(folder_id)
    .fetch_optional(&mut *conn)
    .await?;
    match folder {
        Some(f) if f.user_id == user_id => Ok(f),
        _ => Err(DriveError::FolderNotFound),
    }
}

/// Fetch a file, reporting ownership mismatch identically to absence.
async fn fetch_file(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    file_id: Uuid,
) -> DriveResult<File> {
    let file = sqlx::query_as::<_, File>(&format!(
        "SELECT {FILE_COLUMNS} FROM files WHERE id = ?"
    ))
    .bind(file_id)
    .fetch_optional(&mut *conn)
    .await?;
    match file {
        Some(f) if f.user_id == user_id => Ok(f),
        _ => Err(DriveError::FileNotFound),
    }
}

async fn home_folder_of(conn: &mut SqliteConnection, user_id: Uuid) -> DriveResult<Folder> {
    sqlx::query_as::<_, Folder>(&format!(
        "SELECT {FOLDER_COLUMNS} FROM folders WHERE user_id = ? AND parent_id IS NULL"
    ))
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(DriveError::FolderNotFound)
}

async fn ensure_no_sibling_folder(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    parent_id: Uuid,
    name: &str,
    exclude: Option<Uuid>,
) -> DriveResult<()> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*) FROM folders WHERE user_id = ",
    );
    builder.push_bind(user_id);
    builder.push(" AND parent_id = ");
    builder.push_bind(parent_id);
    builder.push(" AND name = ");
    builder.push_bind(name);
    if let Some(id) = exclude {
        builder.push(" AND id != ");
        builder.push_bind(id);
    }
    let taken: i64 = builder.build_query_scalar().fetch_one(&mut *conn).await?;
    if taken > 0 {
        return Err(DriveError::FolderNameTaken);
    }
    Ok(())
}

async fn ensure_no_sibling_file(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    folder_id: Uuid,
    name: &str,
    exclude: Option<Uuid>,
) -> DriveResult<()> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT COUNT(*) FROM files WHERE user_id = ",
    );
    builder.push_bind(user_id);
    builder.push(" AND folder_id = ");
    builder.push_bind(folder_id);
    builder.push(" AND name = ");
    builder.push_bind(name);
    if let Some(id) = exclude {
        builder.push(" AND id != ");
        builder.push_bind(id);
    }
    let taken: i64 = builder.build_query_scalar().fetch_one(&mut *conn).await?;
    if taken > 0 {
        return Err(DriveError::FileNameTaken);
    }
    Ok(())
}

/// Collect everything a deletion of `target` covers.
///
/// Descendants are gathered with an explicit worklist — folder depth is
/// user-controlled, so call recursion is out. Shared by the stats preview
/// and the delete itself; the two must never diverge.
async fn deletion_scope(conn: &mut SqliteConnection, target: Uuid) -> DriveResult<DeletionScope> {
    let mut folder_ids = vec![target];
    let mut pending = vec![target];
    while let Some(current) = pending.pop() {
        let children: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM folders WHERE parent_id = ?")
            .bind(current)
            .fetch_all(&mut *conn)
            .await?;
        folder_ids.extend(children.iter().copied());
        pending.extend(children);
    }

    // folder_ids always holds at least the target, so the IN list is never empty
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT storage_key, size FROM files WHERE folder_id IN (",
    );
    let mut separated = builder.separated(", ");
    for id in &folder_ids {
        separated.push_bind(*id);
    }
    builder.push(")");
    let files: Vec<BlobFileRef> = builder.build_query_as().fetch_all(&mut *conn).await?;
    let total_size = files.iter().map(|f| f.size).sum();

    Ok(DeletionScope {
        folder_ids,
        files,
        total_size,
    })
}

/// Return true if the SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MockBlobStore;
    use futures::stream;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    async fn service() -> DriveService<MockBlobStore> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        DriveService::new(Arc::new(pool), MockBlobStore::new())
    }

    fn text_file(name: &str, size: i64, folder_id: Uuid) -> RegisterFile {
        RegisterFile {
            name: name.to_string(),
            size,
            mime_type: "text/plain".to_string(),
            url: format!("/blobs/{name}"),
            storage_key: format!("key-{name}"),
            folder_id,
        }
    }

    fn body(bytes: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::iter(vec![Ok(Bytes::from_static(bytes))])
    }

    #[tokio::test]
    async fn create_user_provisions_home_root() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();

        let home = svc.home_folder(user.id).await.unwrap();
        assert_eq!(home.name, "Home");
        assert_eq!(home.parent_id, None);
        assert_eq!(svc.storage_info(user.id).await.unwrap().used_bytes, 0);
    }

    #[tokio::test]
    async fn quota_tracks_creates_and_deletes() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();
        let home = svc.home_folder(user.id).await.unwrap();

        svc.register_file(user.id, text_file("a.txt", 1000, home.id))
            .await
            .unwrap();
        let b = svc
            .register_file(user.id, text_file("b.txt", 500, home.id))
            .await
            .unwrap();
        assert_eq!(svc.storage_info(user.id).await.unwrap().used_bytes, 1500);

        let deleted = svc.delete_file(user.id, b.id).await.unwrap();
        assert_eq!(deleted.name, "b.txt");
        assert_eq!(deleted.size, 500);
        assert_eq!(svc.storage_info(user.id).await.unwrap().used_bytes, 1000);
    }

    #[tokio::test]
    async fn quota_ceiling_is_enforced_atomically() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();
        let home = svc.home_folder(user.id).await.unwrap();

        let mut big = text_file("big.mp4", MAX_STORAGE_LIMIT, home.id);
        big.mime_type = "video/mp4".to_string();
        svc.register_file(user.id, big).await.unwrap();
        assert_eq!(
            svc.storage_info(user.id).await.unwrap().used_bytes,
            MAX_STORAGE_LIMIT
        );

        let res = svc
            .register_file(user.id, text_file("extra.txt", 1, home.id))
            .await;
        assert!(matches!(res, Err(DriveError::StorageLimitExceeded)));
        // the failed create left no row and no charge behind
        assert_eq!(
            svc.storage_info(user.id).await.unwrap().used_bytes,
            MAX_STORAGE_LIMIT
        );
        let contents = svc.folder_contents(user.id, home.id).await.unwrap();
        assert_eq!(contents.files.len(), 1);
    }

    #[tokio::test]
    async fn sibling_names_must_be_unique() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();
        let home = svc.home_folder(user.id).await.unwrap();

        let docs = svc
            .create_folder(user.id, "Docs", Some(home.id))
            .await
            .unwrap();
        let res = svc.create_folder(user.id, "Docs", Some(home.id)).await;
        assert!(matches!(res, Err(DriveError::FolderNameTaken)));
        // same name one level down is fine
        svc.create_folder(user.id, "Docs", Some(docs.id))
            .await
            .unwrap();

        svc.register_file(user.id, text_file("a.txt", 10, home.id))
            .await
            .unwrap();
        let res = svc
            .register_file(user.id, text_file("a.txt", 10, home.id))
            .await;
        assert!(matches!(res, Err(DriveError::FileNameTaken)));
        assert_eq!(svc.storage_info(user.id).await.unwrap().used_bytes, 10);
    }

    #[tokio::test]
    async fn rename_collision_leaves_state_unchanged() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();
        let home = svc.home_folder(user.id).await.unwrap();

        svc.create_folder(user.id, "Docs", Some(home.id))
            .await
            .unwrap();
        let music = svc
            .create_folder(user.id, "Music", Some(home.id))
            .await
            .unwrap();

        let res = svc.rename_folder(user.id, music.id, "Docs").await;
        assert!(matches!(res, Err(DriveError::FolderNameTaken)));
        let contents = svc.folder_contents(user.id, home.id).await.unwrap();
        let names: Vec<&str> = contents.folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Docs", "Music"]);

        // renaming to its own current name is a self-collision-free no-op
        let renamed = svc.rename_folder(user.id, music.id, "Music").await.unwrap();
        assert_eq!(renamed.name, "Music");
    }

    #[tokio::test]
    async fn stats_preview_matches_delete_report() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();
        let home = svc.home_folder(user.id).await.unwrap();

        // Home -> Docs (a.txt, 1000) -> Old (b.txt, 500)
        let docs = svc
            .create_folder(user.id, "Docs", Some(home.id))
            .await
            .unwrap();
        let old = svc
            .create_folder(user.id, "Old", Some(docs.id))
            .await
            .unwrap();
        svc.register_file(user.id, text_file("a.txt", 1000, docs.id))
            .await
            .unwrap();
        svc.register_file(user.id, text_file("b.txt", 500, old.id))
            .await
            .unwrap();
        svc.blobs.insert("key-a.txt", vec![0; 4]);
        svc.blobs.insert("key-b.txt", vec![0; 4]);

        let stats = svc.folder_stats(user.id, docs.id).await.unwrap();
        assert_eq!(
            stats,
            FolderStats {
                sub_folder_count: 1,
                file_count: 2
            }
        );

        let outcome = svc.delete_folder(user.id, docs.id).await.unwrap();
        assert_eq!(
            outcome,
            DeleteFolderOutcome {
                deleted_files: 2,
                deleted_folders: 2,
                freed_space: 1500
            }
        );
        assert_eq!(outcome.deleted_folders, stats.sub_folder_count + 1);
        assert_eq!(outcome.deleted_files, stats.file_count);

        assert_eq!(svc.storage_info(user.id).await.unwrap().used_bytes, 0);
        assert!(svc.blobs.is_empty());
        let res = svc.folder_stats(user.id, docs.id).await;
        assert!(matches!(res, Err(DriveError::FolderNotFound)));
        // nothing outside the scope was touched
        svc.home_folder(user.id).await.unwrap();
    }

    #[tokio::test]
    async fn cascade_delete_spares_unrelated_rows() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();
        let home = svc.home_folder(user.id).await.unwrap();

        let keep = svc
            .create_folder(user.id, "Keep", Some(home.id))
            .await
            .unwrap();
        let trash = svc
            .create_folder(user.id, "Trash", Some(home.id))
            .await
            .unwrap();
        let kept_file = svc
            .register_file(user.id, text_file("kept.txt", 100, keep.id))
            .await
            .unwrap();
        svc.register_file(user.id, text_file("trashed.txt", 200, trash.id))
            .await
            .unwrap();

        svc.delete_folder(user.id, trash.id).await.unwrap();

        let contents = svc.folder_contents(user.id, keep.id).await.unwrap();
        assert_eq!(contents.files[0].id, kept_file.id);
        assert_eq!(svc.storage_info(user.id).await.unwrap().used_bytes, 100);
    }

    #[tokio::test]
    async fn folder_delete_survives_blob_failure_but_file_delete_aborts() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();
        let home = svc.home_folder(user.id).await.unwrap();

        let docs = svc
            .create_folder(user.id, "Docs", Some(home.id))
            .await
            .unwrap();
        svc.register_file(user.id, text_file("a.txt", 1000, docs.id))
            .await
            .unwrap();
        let lone = svc
            .register_file(user.id, text_file("lone.txt", 50, home.id))
            .await
            .unwrap();
        svc.blobs.insert("key-a.txt", vec![0; 4]);
        svc.blobs.insert("key-lone.txt", vec![0; 4]);
        svc.blobs.set_fail_deletes(true);

        // single-file delete aborts: row, quota, and payload all untouched
        let res = svc.delete_file(user.id, lone.id).await;
        assert!(matches!(res, Err(DriveError::BlobStore(_))));
        assert_eq!(svc.storage_info(user.id).await.unwrap().used_bytes, 1050);
        assert!(svc.blobs.contains("key-lone.txt"));
        svc.folder_contents(user.id, home.id)
            .await
            .map(|c| assert_eq!(c.files.len(), 1))
            .unwrap();

        // folder delete proceeds: rows and quota cleaned up, payload orphaned
        let outcome = svc.delete_folder(user.id, docs.id).await.unwrap();
        assert_eq!(outcome.deleted_files, 1);
        assert_eq!(svc.storage_info(user.id).await.unwrap().used_bytes, 50);
        assert!(svc.blobs.contains("key-a.txt"));
        let res = svc.folder_stats(user.id, docs.id).await;
        assert!(matches!(res, Err(DriveError::FolderNotFound)));
    }

    #[tokio::test]
    async fn home_root_is_protected() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();
        let home = svc.home_folder(user.id).await.unwrap();

        let res = svc.rename_folder(user.id, home.id, "NotHome").await;
        assert!(matches!(res, Err(DriveError::HomeFolderProtected)));
        let res = svc.delete_folder(user.id, home.id).await;
        assert!(matches!(res, Err(DriveError::HomeFolderProtected)));
        // starring Home is still allowed
        let starred = svc.toggle_folder_star(user.id, home.id).await.unwrap();
        assert!(starred.is_starred);
    }

    #[tokio::test]
    async fn foreign_folders_report_not_found() {
        let svc = service().await;
        let alice = svc.create_user("alice").await.unwrap();
        let mallory = svc.create_user("mallory").await.unwrap();
        let home = svc.home_folder(alice.id).await.unwrap();
        let docs = svc
            .create_folder(alice.id, "Docs", Some(home.id))
            .await
            .unwrap();

        let res = svc.folder_stats(mallory.id, docs.id).await;
        assert!(matches!(res, Err(DriveError::FolderNotFound)));
        let res = svc.delete_folder(mallory.id, docs.id).await;
        assert!(matches!(res, Err(DriveError::FolderNotFound)));
        let res = svc.rename_folder(mallory.id, docs.id, "Mine").await;
        assert!(matches!(res, Err(DriveError::FolderNotFound)));
    }

    #[tokio::test]
    async fn deep_chains_walk_without_recursion() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();
        let home = svc.home_folder(user.id).await.unwrap();

        let top = svc
            .create_folder(user.id, "d0", Some(home.id))
            .await
            .unwrap();
        let mut parent = top.id;
        for depth in 1..200 {
            parent = svc
                .create_folder(user.id, &format!("d{depth}"), Some(parent))
                .await
                .unwrap()
                .id;
        }
        svc.register_file(user.id, text_file("leaf.txt", 7, parent))
            .await
            .unwrap();

        let stats = svc.folder_stats(user.id, top.id).await.unwrap();
        assert_eq!(stats.sub_folder_count, 199);
        assert_eq!(stats.file_count, 1);

        let outcome = svc.delete_folder(user.id, top.id).await.unwrap();
        assert_eq!(outcome.deleted_folders, 200);
        assert_eq!(outcome.freed_space, 7);
    }

    #[tokio::test]
    async fn upload_stores_payload_and_registers_row() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();

        let file = svc
            .upload_file(user.id, None, "notes.txt", "text/plain", body(b"hello"))
            .await
            .unwrap();
        assert_eq!(file.size, 5);
        assert_eq!(file.url, format!("/blobs/{}", file.storage_key));
        assert!(svc.blobs.contains(&file.storage_key));
        assert_eq!(svc.storage_info(user.id).await.unwrap().used_bytes, 5);
    }

    #[tokio::test]
    async fn upload_is_rejected_before_bytes_when_drive_full() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();
        let home = svc.home_folder(user.id).await.unwrap();

        let mut big = text_file("big.mp4", MAX_STORAGE_LIMIT, home.id);
        big.mime_type = "video/mp4".to_string();
        svc.register_file(user.id, big).await.unwrap();

        let res = svc
            .upload_file(user.id, None, "late.txt", "text/plain", body(b"x"))
            .await;
        assert!(matches!(res, Err(DriveError::StorageLimitExceeded)));
        assert!(svc.blobs.is_empty());
    }

    #[tokio::test]
    async fn upload_rejects_unsupported_types() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();

        let res = svc
            .upload_file(user.id, None, "run.sh", "application/x-sh", body(b"#!"))
            .await;
        assert!(matches!(res, Err(DriveError::UnsupportedFileType(_))));
        assert!(svc.blobs.is_empty());
    }

    #[tokio::test]
    async fn oversized_registration_is_rejected() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();
        let home = svc.home_folder(user.id).await.unwrap();

        let res = svc
            .register_file(
                user.id,
                text_file("big.txt", config::MAX_FILE_SIZE_BYTES + 1, home.id),
            )
            .await;
        assert!(matches!(res, Err(DriveError::FileTooLarge { .. })));
        assert_eq!(svc.storage_info(user.id).await.unwrap().used_bytes, 0);
    }

    #[tokio::test]
    async fn starred_listing_covers_folders_and_files() {
        let svc = service().await;
        let user = svc.create_user("alice").await.unwrap();
        let home = svc.home_folder(user.id).await.unwrap();

        let docs = svc
            .create_folder(user.id, "Docs", Some(home.id))
            .await
            .unwrap();
        let file = svc
            .register_file(user.id, text_file("a.txt", 10, home.id))
            .await
            .unwrap();

        svc.toggle_folder_star(user.id, docs.id).await.unwrap();
        svc.toggle_file_star(user.id, file.id).await.unwrap();

        let starred = svc.starred_items(user.id).await.unwrap();
        assert_eq!(starred.folders.len(), 1);
        assert_eq!(starred.files.len(), 1);

        // a second toggle unstars
        svc.toggle_file_star(user.id, file.id).await.unwrap();
        let starred = svc.starred_items(user.id).await.unwrap();
        assert!(starred.files.is_empty());
    }
}
