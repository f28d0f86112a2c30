//! The storage adapter exposed to the host
//!
//! `S3Store` maps the host's logical files onto bucket keys and moves bytes in
//! both directions. Target directories passed by the host are relative to the
//! configured path prefix.
//!
//! `exists` and `delete` answer with a plain `bool`: the host only needs a
//! yes/no signal from them, so their `StorageResult` is collapsed at this
//! boundary and the cause is only logged.

use async_trait::async_trait;
use bytes::Bytes;
use mediabucket_core::constants::cache_control_header;
use mediabucket_core::{LogicalFile, ReadOptions, StorageConfig};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;

use crate::keys::{self, ObjectUrls};
use crate::namer::{DatedFileNamer, FileNamer, KeyLookup};
use crate::proxy::StreamProxy;
use crate::traits::{ObjectClient, PutObject, StorageResult};

/// S3-backed media store
#[derive(Clone)]
pub struct S3Store {
    config: Arc<StorageConfig>,
    client: Arc<dyn ObjectClient>,
    namer: Arc<dyn FileNamer>,
    urls: ObjectUrls,
}

impl S3Store {
    /// Connect to the bucket described by `config`
    #[cfg(feature = "storage-s3")]
    pub async fn connect(config: StorageConfig) -> StorageResult<Self> {
        let client = crate::s3::S3Client::new(&config).await?;
        Ok(Self::with_client(config, Arc::new(client)))
    }

    /// Build on top of any object store client
    pub fn with_client(config: StorageConfig, client: Arc<dyn ObjectClient>) -> Self {
        let urls = ObjectUrls::from_config(&config);
        S3Store {
            config: Arc::new(config),
            client,
            namer: Arc::new(DatedFileNamer::default()),
            urls,
        }
    }

    /// Replace the host naming policy
    pub fn with_namer(mut self, namer: Arc<dyn FileNamer>) -> Self {
        self.namer = namer;
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Directory for a prefix-relative target directory, or the namer's
    /// default directory when none is given.
    fn directory(&self, target_dir: Option<&str>) -> String {
        match target_dir.filter(|dir| !dir.is_empty()) {
            Some(dir) => keys::prefixed_dir(&self.config.path_prefix, dir),
            None => self.namer.target_dir(&self.config.path_prefix),
        }
    }

    fn put_request(&self, key: String, file: &LogicalFile, body: Bytes) -> PutObject {
        PutObject {
            key,
            body,
            acl: self.config.acl.clone(),
            cache_control: cache_control_header(),
            content_type: file.content_type.clone(),
            server_side_encryption: self.config.server_side_encryption.clone(),
        }
    }

    async fn upload(&self, key: String, file: &LogicalFile, body: Bytes) -> StorageResult<String> {
        let size = body.len() as u64;
        let request = self.put_request(key, file, body);
        let key = request.key.clone();

        let url = self.client.put_object(request).await?;

        tracing::info!(
            bucket = %self.config.bucket,
            key = %key,
            content_type = %file.content_type,
            size_bytes = size,
            "Stored file"
        );

        Ok(url)
    }

    /// Save `file` under a fresh, unused key and return its public URL.
    ///
    /// Name negotiation and reading the local file run concurrently.
    pub async fn save(
        &self,
        file: &LogicalFile,
        target_dir: Option<&str>,
    ) -> StorageResult<String> {
        let directory = self.directory(target_dir);

        let (file_name, body) = tokio::try_join!(
            self.namer.unique_file_name(self, file, &directory),
            read_local(&file.path),
        )?;

        let key = keys::strip_leading_slash(&file_name).to_string();
        self.upload(key, file, body).await
    }

    /// Save `file` as `target_filename` without uniqueness negotiation.
    ///
    /// Concurrent saves to the same name are last-write-wins.
    pub async fn save_with_name(
        &self,
        file: &LogicalFile,
        target_dir: Option<&str>,
        target_filename: &str,
    ) -> StorageResult<String> {
        let directory = self.directory(target_dir);
        let body = read_local(&file.path).await?;
        let key = keys::resolve(&directory, target_filename);
        self.upload(key, file, body).await
    }

    /// Whether `file_name` exists in `target_dir`. Any failure counts as `false`.
    pub async fn exists(&self, file_name: &str, target_dir: Option<&str>) -> bool {
        let key = keys::resolve(&self.directory(target_dir), file_name);
        self.key_exists(&key).await
    }

    /// Delete `file_name` from `target_dir`. Any failure counts as `false`.
    pub async fn delete(&self, file_name: &str, target_dir: Option<&str>) -> bool {
        let key = keys::resolve(&self.directory(target_dir), file_name);
        match self.client.delete_object(&key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    bucket = %self.config.bucket,
                    key = %key,
                    "Delete failed, reporting false"
                );
                false
            }
        }
    }

    /// Raw bytes of the object an external reference points at.
    pub async fn read(&self, options: &ReadOptions) -> StorageResult<Bytes> {
        let reference = options.path.as_deref().unwrap_or_default();
        let key = self.urls.key_for(reference)?;
        let start = std::time::Instant::now();

        let data = self.client.get_object(&key).await?;

        tracing::debug!(
            bucket = %self.config.bucket,
            key = %key,
            size_bytes = data.len() as u64,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Read file"
        );

        Ok(data)
    }

    /// Like [`read`](Self::read), parsing the body as JSON into `T`.
    pub async fn read_json<T: DeserializeOwned>(&self, options: &ReadOptions) -> StorageResult<T> {
        let data = self.read(options).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Like [`read`](Self::read), returning the parsed JSON document.
    pub async fn read_document(&self, options: &ReadOptions) -> StorageResult<serde_json::Value> {
        self.read_json(options).await
    }

    /// Request proxy serving objects under the configured prefix
    pub fn serve(&self) -> StreamProxy {
        StreamProxy::new(self.client.clone(), self.config.path_prefix.clone())
    }
}

#[async_trait]
impl KeyLookup for S3Store {
    async fn key_exists(&self, key: &str) -> bool {
        match self.client.head_object(key).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    bucket = %self.config.bucket,
                    key = %key,
                    "Existence check failed, reporting false"
                );
                false
            }
        }
    }
}

async fn read_local(path: &Path) -> StorageResult<Bytes> {
    Ok(Bytes::from(tokio::fs::read(path).await?))
}
