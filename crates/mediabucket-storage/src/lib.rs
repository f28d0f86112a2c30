//! Mediabucket Storage Library
//!
//! This crate lets a content-management host keep its media in an
//! S3-compatible bucket. It includes the object store capability trait, the S3
//! implementation of that trait, and the adapter (`S3Store`) exposing save,
//! read, exists, delete and serve.
//!
//! # Storage key format
//!
//! Keys are composed as `{prefix}/{target_dir}/{filename}`, use `/` as the
//! only separator and never start with `/`. An empty prefix contributes no
//! segment. Key derivation is centralized in the `keys` module.
//!
//! # External references
//!
//! A save returns the object's public URL. With virtual-hosted addressing the
//! URL is `{host}/{key}`; in dev mode (path-style addressing) it is
//! `{host}/{bucket}/{key}`. `S3Store::read` accepts exactly these URLs.

pub mod adapter;
pub mod keys;
#[cfg(any(test, feature = "storage-memory"))]
pub mod memory;
pub mod namer;
pub mod proxy;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use adapter::S3Store;
pub use keys::ObjectUrls;
#[cfg(any(test, feature = "storage-memory"))]
pub use memory::MemoryClient;
pub use namer::{DatedFileNamer, FileNamer, KeyLookup};
pub use proxy::{LogServeErrors, ServeErrorHandler, ServeOutcome, ServeState, StreamProxy};
#[cfg(feature = "storage-s3")]
pub use s3::{S3Client, TransportSettings};
pub use traits::{ObjectClient, ObjectStream, PutObject, StorageError, StorageResult};
