//! Object store abstraction
//!
//! This module defines the capability the adapter needs from a bucket:
//! put, get (buffered or streamed), head and delete against a key.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use http::{HeaderMap, StatusCode};
use std::pin::Pin;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("{0} is not stored in s3")]
    NotStoredHere(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(#[from] serde_json::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Chunked object body
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// A single upload, with the metadata stored alongside the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObject {
    pub key: String,
    pub body: Bytes,
    pub acl: String,
    pub cache_control: String,
    pub content_type: String,
    /// Only sent when encryption is configured
    pub server_side_encryption: Option<String>,
}

/// A streaming fetch whose headers have arrived.
pub struct ObjectStream {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Object store capability trait
///
/// Each client is bound to a single bucket. Implementations report a missing
/// key as `StorageError::NotFound` and every other failure as a transport
/// error; the adapter decides how much of that detail reaches the host.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Upload an object and return its public location URL
    async fn put_object(&self, request: PutObject) -> StorageResult<String>;

    /// Download a whole object
    async fn get_object(&self, key: &str) -> StorageResult<Bytes>;

    /// Start a streaming download. Resolves once the response headers are in.
    async fn get_object_stream(&self, key: &str) -> StorageResult<ObjectStream>;

    /// Fetch object metadata only
    async fn head_object(&self, key: &str) -> StorageResult<()>;

    /// Delete an object
    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    /// Bucket this client talks to
    fn bucket(&self) -> &str;
}
