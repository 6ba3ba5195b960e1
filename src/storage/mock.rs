//! In-memory blob store for testing.

use super::{BlobStore, StoredBlob};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::collections::HashMap;
use std::io;
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, Ordering},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MockStoreError {
    #[error("blob `{0}` not found")]
    NotFound(String),
    #[error("injected blob store failure")]
    Injected,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// In-memory implementation of [`BlobStore`] for tests.
///
/// `fail_deletes` lets a test force the next delete batches to error, to
/// exercise both blob-failure policies of the delete orchestration.
#[derive(Clone, Default)]
pub struct MockBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    fail_deletes: Arc<AtomicBool>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.read().expect("lock poisoned").contains_key(key)
    }

    /// Seed a payload without going through `put_object`.
    pub fn insert(&self, key: impl Into<String>, content: Vec<u8>) {
        self.blobs
            .write()
            .expect("lock poisoned")
            .insert(key.into(), content);
    }

    /// Make every subsequent `delete_objects` call fail until reset.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

impl BlobStore for MockBlobStore {
    type Error = MockStoreError;
    type Reader = std::io::Cursor<Vec<u8>>;

    async fn put_object<S>(&self, key: &str, stream: S) -> Result<StoredBlob, Self::Error>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let mut content = Vec::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            content.extend_from_slice(&chunk?);
        }
        let blob = StoredBlob {
            key: key.to_string(),
            size: content.len() as i64,
            etag: format!("{:x}", md5::compute(&content)),
        };
        self.blobs
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), content);
        Ok(blob)
    }

    async fn get_object(&self, key: &str) -> Result<Self::Reader, Self::Error> {
        self.blobs
            .read()
            .expect("lock poisoned")
            .get(key)
            .cloned()
            .map(std::io::Cursor::new)
            .ok_or_else(|| MockStoreError::NotFound(key.to_string()))
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<(), Self::Error> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(MockStoreError::Injected);
        }
        let mut blobs = self.blobs.write().expect("lock poisoned");
        for key in keys {
            blobs.remove(key);
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
