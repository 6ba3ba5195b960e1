//! Blob-store boundary.
//!
//! File payloads live outside the relational store, addressed by opaque
//! keys. The service core only ever talks to the [`BlobStore`] trait so the
//! orchestration stays testable against [`mock::MockBlobStore`]; the real
//! deployment uses [`disk::DiskBlobStore`].

pub mod disk;
pub mod mock;

use bytes::Bytes;
use futures::Stream;
use std::future::Future;
use std::io;
use tokio::io::AsyncRead;

/// Metadata describing a payload after it has been stored.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    /// Opaque key the payload is addressed by.
    pub key: String,

    /// Payload size in bytes.
    pub size: i64,

    /// Content hash of the payload.
    pub etag: String,
}

/// Generic interface for blob payload operations.
///
/// `delete_objects` is a single batch attempt: implementations must try
/// every key and report an error if any removal failed. Callers decide
/// whether that error aborts their operation.
pub trait BlobStore: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;
    type Reader: AsyncRead + Send + Unpin;

    fn put_object<S>(
        &self,
        key: &str,
        stream: S,
    ) -> impl Future<Output = Result<StoredBlob, Self::Error>> + Send
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static;

    fn get_object(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Self::Reader, Self::Error>> + Send;

    fn delete_objects(
        &self,
        keys: &[String],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Connectivity/IO probe used by the readiness endpoint.
    fn is_healthy(&self) -> impl Future<Output = bool> + Send;
}
