//! Local-disk blob store.
//!
//! Payloads are sharded beneath `base_path/{shard}/{shard}/{key}` to keep
//! per-directory file counts down. Writes stream into a temp file and are
//! atomically renamed into place after an fsync.

use super::{BlobStore, StoredBlob};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_KEY_LEN: usize = 1024;

#[derive(Debug, Error)]
pub enum DiskStoreError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("invalid blob key")]
    InvalidKey,
    #[error("{failed} of {total} blob removals failed")]
    PartialDelete { failed: usize, total: usize },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Blob store backed by a local directory.
#[derive(Clone)]
pub struct DiskBlobStore {
    base_path: PathBuf,
}

impl DiskBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Keys are generated server-side, so this only has to reject
    /// malformed input arriving through the payload-serving route.
    fn ensure_key_safe(key: &str) -> Result<(), DiskStoreError> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(DiskStoreError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(DiskStoreError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(DiskStoreError::InvalidKey);
        }
        Ok(())
    }

    /// Generate two-level shard identifiers for a key.
    ///
    /// Uses MD5(key) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff).
    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Construct the fully-qualified payload path for a key.
    fn blob_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Recursively remove empty shard directories up to the base path.
    ///
    /// Stops on a non-empty directory, a missing directory, the base path
    /// itself, or any unexpected I/O error.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

impl BlobStore for DiskBlobStore {
    type Error = DiskStoreError;
    type Reader = File;

    /// Stream a payload to disk.
    ///
    /// - Writes bytes incrementally to a temporary file.
    /// - Computes MD5/etag and size while streaming.
    /// - Atomically renames into the final location.
    ///
    /// Ensures durable writes (fsync) and cleans up the temp file on errors.
    async fn put_object<S>(&self, key: &str, stream: S) -> Result<StoredBlob, Self::Error>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::ensure_key_safe(key)?;
        let file_path = self.blob_path(key);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| DiskStoreError::Io(io::Error::other("blob path missing parent")))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(DiskStoreError::Io(err));
                }
            };
            size += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(DiskStoreError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(DiskStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(DiskStoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(DiskStoreError::Io(err));
            }
        }

        Ok(StoredBlob {
            key: key.to_string(),
            size,
            etag: format!("{:x}", digest.compute()),
        })
    }

    async fn get_object(&self, key: &str) -> Result<Self::Reader, Self::Error> {
        Self::ensure_key_safe(key)?;
        let file_path = self.blob_path(key);
        File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                DiskStoreError::NotFound(key.to_string())
            } else {
                DiskStoreError::Io(err)
            }
        })
    }

    /// Remove every payload in the batch, then prune empty shard dirs.
    ///
    /// Missing files count as removed so retried deletes stay harmless.
    async fn delete_objects(&self, keys: &[String]) -> Result<(), Self::Error> {
        let mut failed = 0usize;
        for key in keys {
            if Self::ensure_key_safe(key).is_err() {
                failed += 1;
                continue;
            }
            let file_path = self.blob_path(key);
            match fs::remove_file(&file_path).await {
                Ok(_) => debug!("removed payload {}", file_path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!("payload {} already missing", file_path.display());
                }
                Err(err) => {
                    debug!("failed to remove {}: {}", file_path.display(), err);
                    failed += 1;
                    continue;
                }
            }
            if let Some(parent) = file_path.parent() {
                self.prune_empty_dirs(parent).await;
            }
        }
        if failed > 0 {
            return Err(DiskStoreError::PartialDelete {
                failed,
                total: keys.len(),
            });
        }
        Ok(())
    }

    /// Best-effort write/read/delete probe under the base path.
    async fn is_healthy(&self) -> bool {
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        if fs::write(&tmp_path, b"readyz").await.is_err() {
            return false;
        }
        let ok = matches!(fs::read(&tmp_path).await, Ok(bytes) if bytes == b"readyz");
        let _ = fs::remove_file(&tmp_path).await;
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::io::AsyncReadExt;

    fn one_chunk(bytes: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::iter(vec![Ok(Bytes::from_static(bytes))])
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path());

        let blob = store.put_object("abc123", one_chunk(b"hello")).await.unwrap();
        assert_eq!(blob.size, 5);
        assert_eq!(blob.etag, format!("{:x}", md5::compute(b"hello")));

        let mut reader = store.get_object("abc123").await.unwrap();
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn delete_removes_payload_and_prunes_shards() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path());
        store.put_object("k1", one_chunk(b"x")).await.unwrap();

        store.delete_objects(&["k1".to_string()]).await.unwrap();
        assert!(matches!(
            store.get_object("k1").await,
            Err(DiskStoreError::NotFound(_))
        ));
        // shard directories are gone as well
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn delete_is_idempotent_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path());
        store
            .delete_objects(&["never-stored".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path());
        let res = store.get_object("../../etc/passwd").await;
        assert!(matches!(res, Err(DiskStoreError::InvalidKey)));
    }
}
