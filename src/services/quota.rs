//! Storage-quota ledger.
//!
//! `users.storage_used` must always equal the byte sum of the user's
//! current files, so both helpers run on the caller's transaction and are
//! committed together with the file-row change they account for.

use crate::config::MAX_STORAGE_LIMIT;
use crate::services::drive_service::{DriveError, DriveResult};
use sqlx::SqliteConnection;
use tracing::error;
use uuid::Uuid;

/// Count `bytes` against the user's quota.
///
/// The ceiling check and the increment are one guarded UPDATE, so two
/// concurrent creates cannot both slip under the limit and oversubscribe.
pub async fn charge(conn: &mut SqliteConnection, user_id: Uuid, bytes: i64) -> DriveResult<()> {
    let result = sqlx::query(
        "UPDATE users SET storage_used = storage_used + ?
         WHERE id = ? AND storage_used + ? <= ?",
    )
    .bind(bytes)
    .bind(user_id)
    .bind(bytes)
    .bind(MAX_STORAGE_LIMIT)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 1 {
        return Ok(());
    }
    let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;
    if known == 0 {
        Err(DriveError::UserNotFound)
    } else {
        Err(DriveError::StorageLimitExceeded)
    }
}

/// Give `bytes` back to the user's quota.
///
/// A negative counter cannot happen while the ledger invariant holds; if it
/// is observed anyway that is a corruption signal, reported loudly rather
/// than clamped away.
pub async fn release(conn: &mut SqliteConnection, user_id: Uuid, bytes: i64) -> DriveResult<()> {
    let remaining: Option<i64> = sqlx::query_scalar(
        "UPDATE users SET storage_used = storage_used - ? WHERE id = ? RETURNING storage_used",
    )
    .bind(bytes)
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;

    match remaining {
        None => Err(DriveError::UserNotFound),
        Some(left) if left < 0 => {
            error!(
                user_id = %user_id,
                storage_used = left,
                "storage ledger went negative, quota accounting is corrupt"
            );
            Ok(())
        }
        Some(_) => Ok(()),
    }
}
