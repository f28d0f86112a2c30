use crate::keys::ObjectUrls;
use crate::traits::{ObjectClient, ObjectStream, PutObject, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use mediabucket_core::StorageConfig;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Object store operations, as recorded by [`MemoryClient`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Put,
    Get,
    Head,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    pub key: String,
}

/// In-memory object store
///
/// Keeps every upload with its metadata, records each call, and can be told to
/// fail an operation with a transport error. Streams are served in fixed-size
/// chunks so consumers see more than one chunk for larger objects.
pub struct MemoryClient {
    urls: ObjectUrls,
    bucket: String,
    chunk_size: usize,
    objects: Mutex<HashMap<String, PutObject>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<Operation, String>>,
    stream_failure_after: Mutex<Option<usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryClient {
    pub fn new(urls: ObjectUrls, bucket: impl Into<String>) -> Self {
        MemoryClient {
            urls,
            bucket: bucket.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            objects: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            stream_failure_after: Mutex::new(None),
        }
    }

    /// Client whose location URLs match what `config` would produce on S3.
    pub fn for_config(config: &StorageConfig) -> Self {
        Self::new(ObjectUrls::from_config(config), config.bucket.clone())
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Store an object directly, bypassing the call log.
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>, content_type: &str) {
        let key = key.into();
        let object = PutObject {
            key: key.clone(),
            body: body.into(),
            acl: String::new(),
            cache_control: String::new(),
            content_type: content_type.to_string(),
            server_side_encryption: None,
        };
        lock(&self.objects).insert(key, object);
    }

    /// Make every later `operation` fail with a transport error.
    pub fn fail(&self, operation: Operation, message: impl Into<String>) {
        lock(&self.failures).insert(operation, message.into());
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
        *lock(&self.stream_failure_after) = None;
    }

    /// Make streamed bodies fail after `chunks` chunks.
    pub fn fail_stream_after(&self, chunks: usize) {
        *lock(&self.stream_failure_after) = Some(chunks);
    }

    pub fn object(&self, key: &str) -> Option<PutObject> {
        lock(&self.objects).get(key).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    /// Recorded uploads, in call order
    pub fn puts(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.operation == Operation::Put)
            .collect()
    }

    fn record(&self, operation: Operation, key: &str) -> StorageResult<()> {
        lock(&self.calls).push(Call {
            operation,
            key: key.to_string(),
        });
        match lock(&self.failures).get(&operation) {
            Some(message) => Err(StorageError::BackendError(message.clone())),
            None => Ok(()),
        }
    }

    fn find(&self, key: &str) -> StorageResult<PutObject> {
        self.object(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}

fn object_headers(object: &PutObject) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let values = [
        (header::CONTENT_TYPE, object.content_type.clone()),
        (header::CONTENT_LENGTH, object.body.len().to_string()),
        (header::CACHE_CONTROL, object.cache_control.clone()),
    ];
    for (name, value) in values {
        if value.is_empty() {
            continue;
        }
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    }
    headers
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn put_object(&self, request: PutObject) -> StorageResult<String> {
        self.record(Operation::Put, &request.key)
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        let url = self.urls.url_for(&request.key);
        lock(&self.objects).insert(request.key.clone(), request);
        Ok(url)
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        self.record(Operation::Get, key)?;
        Ok(self.find(key)?.body)
    }

    async fn get_object_stream(&self, key: &str) -> StorageResult<ObjectStream> {
        self.record(Operation::Get, key)?;
        let object = self.find(key)?;
        let headers = object_headers(&object);

        let mut chunks: Vec<StorageResult<Bytes>> = Vec::new();
        let mut offset = 0;
        while offset < object.body.len() {
            let end = (offset + self.chunk_size).min(object.body.len());
            chunks.push(Ok(object.body.slice(offset..end)));
            offset = end;
        }
        if let Some(after) = *lock(&self.stream_failure_after) {
            chunks.truncate(after);
            chunks.push(Err(StorageError::DownloadFailed(
                "connection reset by peer".to_string(),
            )));
        }

        Ok(ObjectStream {
            status: StatusCode::OK,
            headers,
            body: Box::pin(futures::stream::iter(chunks)),
        })
    }

    async fn head_object(&self, key: &str) -> StorageResult<()> {
        self.record(Operation::Head, key)?;
        self.find(key).map(|_| ())
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.record(Operation::Delete, key)
            .map_err(|e| StorageError::DeleteFailed(e.to_string()))?;
        lock(&self.objects).remove(key);
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn client() -> MemoryClient {
        MemoryClient::for_config(&StorageConfig::new("media-bucket")).with_chunk_size(4)
    }

    #[tokio::test]
    async fn test_stream_is_chunked() {
        let client = client();
        client.insert("a.txt", &b"0123456789"[..], "text/plain");

        let object = client.get_object_stream("a.txt").await.unwrap();
        assert_eq!(object.headers[header::CONTENT_LENGTH], "10");
        let chunks: Vec<_> = object.body.collect().await;
        assert_eq!(chunks.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let client = client();
        let result = client.get_object("missing").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        let result = client.head_object("missing").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_forced_failure_is_transport_error() {
        let client = client();
        client.insert("a.txt", &b"x"[..], "text/plain");
        client.fail(Operation::Head, "access denied");

        let result = client.head_object("a.txt").await;
        assert!(matches!(result, Err(StorageError::BackendError(_))));
        assert_eq!(client.calls().len(), 1);

        client.clear_failures();
        assert!(client.head_object("a.txt").await.is_ok());
    }
}
