use crate::keys::ObjectUrls;
use crate::traits::{ByteStream, ObjectClient, ObjectStream, PutObject, StorageError, StorageResult};
use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::operation::get_object::GetObjectOutput;
use aws_sdk_s3::primitives::{ByteStream as SdkByteStream, DateTimeFormat};
use aws_sdk_s3::types::{ObjectCannedAcl, ServerSideEncryption};
use aws_sdk_s3::Client;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use mediabucket_core::StorageConfig;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Connection-scoped headers that must not be relayed to another client
const HOP_BY_HOP_HEADERS: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// How the SDK client addresses the bucket.
///
/// Dev mode forces path-style requests against the configured host, which is
/// what MinIO and other emulators expect. Otherwise the SDK's default
/// virtual-hosted addressing and endpoint resolution apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

impl TransportSettings {
    pub fn from_config(config: &StorageConfig) -> Self {
        if config.dev_mode {
            TransportSettings {
                endpoint_url: config.host.clone(),
                force_path_style: true,
            }
        } else {
            TransportSettings {
                endpoint_url: None,
                force_path_style: false,
            }
        }
    }

    pub fn apply(&self, builder: aws_sdk_s3::config::Builder) -> aws_sdk_s3::config::Builder {
        let builder = builder.force_path_style(self.force_path_style);
        match self.endpoint_url {
            Some(ref endpoint) => builder.endpoint_url(endpoint.clone()),
            None => builder,
        }
    }
}

/// S3 object store client
///
/// Every adapter owns its own SDK client built from its own configuration,
/// so adapters with different credentials never share transport state.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
    urls: ObjectUrls,
}

impl S3Client {
    /// Create a new S3Client
    ///
    /// Static credentials are used when configured; otherwise the AWS default
    /// provider chain (environment, profile, instance metadata) applies.
    pub async fn new(config: &StorageConfig) -> StorageResult<Self> {
        config
            .validate()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let (Some(ref id), Some(ref secret)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                id.clone(),
                secret.clone(),
                None,
                None,
                "mediabucket",
            ));
        }

        let sdk_config = loader.load().await;
        let settings = TransportSettings::from_config(config);
        let s3_config = settings
            .apply(aws_sdk_s3::config::Builder::from(&sdk_config))
            .build();

        tracing::info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?settings.endpoint_url,
            force_path_style = settings.force_path_style,
            "S3 client configured"
        );

        Ok(Self::from_client(
            Client::from_conf(s3_config),
            config.bucket.clone(),
            ObjectUrls::from_config(config),
        ))
    }

    /// Wrap an already configured SDK client.
    pub fn from_client(client: Client, bucket: String, urls: ObjectUrls) -> Self {
        S3Client {
            client,
            bucket,
            urls,
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: Option<&str>) {
    if let Some(value) = value {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    }
}

/// Status line and headers of the last raw HTTP response of a request.
///
/// Filled from the SDK's response hook, before the body is deserialized, so
/// every header the store sent is kept, including ones the typed output has
/// no field for.
#[derive(Clone, Default)]
struct RawResponse(Arc<Mutex<Option<(StatusCode, HeaderMap)>>>);

impl RawResponse {
    fn record<'a>(&self, status: u16, headers: impl Iterator<Item = (&'a str, &'a str)>) {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
        let mut relayed = HeaderMap::new();
        for (name, value) in headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            if HOP_BY_HOP_HEADERS.contains(&name.as_str()) {
                continue;
            }
            if let Ok(value) = HeaderValue::from_str(value) {
                relayed.append(name, value);
            }
        }
        *self.slot() = Some((status, relayed));
    }

    fn take(&self) -> Option<(StatusCode, HeaderMap)> {
        self.slot().take()
    }

    fn slot(&self) -> MutexGuard<'_, Option<(StatusCode, HeaderMap)>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Headers rebuilt from the typed GetObject output.
///
/// Only used when the raw response was not captured.
fn object_headers(output: &GetObjectOutput) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, header::CONTENT_TYPE, output.content_type());
    insert_header(
        &mut headers,
        header::CONTENT_LENGTH,
        output
            .content_length()
            .map(|len| len.to_string())
            .as_deref(),
    );
    insert_header(&mut headers, header::CACHE_CONTROL, output.cache_control());
    insert_header(
        &mut headers,
        header::CONTENT_ENCODING,
        output.content_encoding(),
    );
    insert_header(
        &mut headers,
        header::CONTENT_DISPOSITION,
        output.content_disposition(),
    );
    insert_header(
        &mut headers,
        header::CONTENT_LANGUAGE,
        output.content_language(),
    );
    insert_header(&mut headers, header::ETAG, output.e_tag());
    insert_header(&mut headers, header::ACCEPT_RANGES, output.accept_ranges());
    insert_header(
        &mut headers,
        header::LAST_MODIFIED,
        output
            .last_modified()
            .and_then(|t| t.fmt(DateTimeFormat::HttpDate).ok())
            .as_deref(),
    );
    insert_header(
        &mut headers,
        HeaderName::from_static("x-amz-server-side-encryption"),
        output.server_side_encryption().map(|s| s.as_str()),
    );
    for (name, value) in output.metadata().into_iter().flatten() {
        let name = format!("x-amz-meta-{}", name);
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            insert_header(&mut headers, name, Some(value.as_str()));
        }
    }
    headers
}

fn into_chunks(body: SdkByteStream, bucket: String, key: String) -> ByteStream {
    let stream = futures::stream::unfold(Some(body), move |state| {
        let bucket = bucket.clone();
        let key = key.clone();
        async move {
            let mut body = state?;
            match body.next().await {
                Some(Ok(chunk)) => Some((Ok::<Bytes, StorageError>(chunk), Some(body))),
                Some(Err(e)) => {
                    tracing::error!(
                        error = %e,
                        bucket = %bucket,
                        key = %key,
                        "S3 stream download error"
                    );
                    Some((Err(StorageError::DownloadFailed(e.to_string())), None))
                }
                None => None,
            }
        }
    });
    Box::pin(stream)
}

#[async_trait]
impl ObjectClient for S3Client {
    async fn put_object(&self, request: PutObject) -> StorageResult<String> {
        let PutObject {
            key,
            body,
            acl,
            cache_control,
            content_type,
            server_side_encryption,
        } = request;
        let size = body.len() as u64;
        let start = std::time::Instant::now();

        let mut put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(SdkByteStream::from(body))
            .cache_control(cache_control)
            .content_type(content_type);

        if !acl.is_empty() {
            put = put.acl(ObjectCannedAcl::from(acl.as_str()));
        }
        if let Some(ref mode) = server_side_encryption {
            put = put.server_side_encryption(ServerSideEncryption::from(mode.as_str()));
        }

        put.send().await.map_err(|e| {
            tracing::error!(
                error = %DisplayErrorContext(&e),
                bucket = %self.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 upload failed"
            );
            StorageError::UploadFailed(DisplayErrorContext(&e).to_string())
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(self.urls.url_for(&key))
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        let start = std::time::Instant::now();

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    return StorageError::NotFound(key.to_string());
                }
                tracing::error!(
                    error = %DisplayErrorContext(&e),
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 download failed"
                );
                StorageError::DownloadFailed(DisplayErrorContext(&e).to_string())
            })?;

        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes();

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = bytes.len() as u64,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 download successful"
        );

        Ok(bytes)
    }

    async fn get_object_stream(&self, key: &str) -> StorageResult<ObjectStream> {
        let raw = RawResponse::default();
        let capture = raw.clone();

        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .customize()
            .mutate_response(move |response| {
                capture.record(response.status().as_u16(), response.headers().iter());
            })
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::DownloadFailed(DisplayErrorContext(&e).to_string())
                }
            })?;

        let (status, headers) = raw
            .take()
            .unwrap_or_else(|| (StatusCode::OK, object_headers(&output)));
        let body = into_chunks(output.body, self.bucket.clone(), key.to_string());

        Ok(ObjectStream {
            status,
            headers,
            body,
        })
    }

    async fn head_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::BackendError(DisplayErrorContext(&e).to_string())
                }
            })
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let start = std::time::Instant::now();

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %DisplayErrorContext(&e),
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                StorageError::DeleteFailed(DisplayErrorContext(&e).to_string())
            })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::S3Store;
    use axum::body::Body;
    use axum::extract::State;
    use axum::http::{Method, Uri};
    use axum::response::Response;
    use futures::StreamExt;
    use mediabucket_core::LogicalFile;
    use std::time::Duration;

    const FAR_EXPIRY: &str = "Thu, 01 Jan 2099 00:00:00 GMT";
    const NO_SUCH_KEY: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
        <Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message>\
        <RequestId>req-1</RequestId></Error>";
    const ACCESS_DENIED: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
        <Error><Code>AccessDenied</Code><Message>Access Denied</Message>\
        <RequestId>req-2</RequestId></Error>";

    #[derive(Debug, Clone)]
    struct Received {
        method: Method,
        path: String,
        headers: HeaderMap,
    }

    /// Local stand-in for a path-style S3 endpoint.
    ///
    /// `missing.png` answers NoSuchKey, `forbidden.png` AccessDenied and
    /// `broken.mp4` drops the connection after the first chunk.
    #[derive(Clone, Default)]
    struct FakeS3 {
        received: Arc<Mutex<Vec<Received>>>,
    }

    impl FakeS3 {
        async fn start() -> (FakeS3, String) {
            let fake = FakeS3::default();
            let state = fake.clone();
            let app = axum::Router::new().fallback(answer).with_state(state);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let endpoint = format!("http://{}", listener.local_addr().unwrap());
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            (fake, endpoint)
        }

        fn requests(&self) -> Vec<Received> {
            self.received.lock().unwrap().clone()
        }

        fn last(&self, method: Method) -> Received {
            let mut matching = self.requests();
            matching.retain(|r| r.method == method);
            matching.pop().unwrap()
        }
    }

    fn respond(status: StatusCode, body: Body) -> Response {
        let mut response = Response::new(body);
        *response.status_mut() = status;
        let xml = HeaderValue::from_static("application/xml");
        response.headers_mut().insert(header::CONTENT_TYPE, xml);
        response
    }

    async fn answer(
        State(fake): State<FakeS3>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
    ) -> Response {
        let path = uri.path().to_string();
        fake.received.lock().unwrap().push(Received {
            method: method.clone(),
            path: path.clone(),
            headers,
        });

        let key = path.trim_start_matches("/media-bucket/");
        match (method, key) {
            (Method::HEAD, "missing.png") => respond(StatusCode::NOT_FOUND, Body::empty()),
            (Method::HEAD, "forbidden.png") => respond(StatusCode::FORBIDDEN, Body::empty()),
            (_, "missing.png") => respond(StatusCode::NOT_FOUND, Body::from(NO_SUCH_KEY)),
            (_, "forbidden.png") => respond(StatusCode::FORBIDDEN, Body::from(ACCESS_DENIED)),
            (Method::GET, "broken.mp4") => {
                let first = futures::stream::iter([Ok(Bytes::from_static(b"abc"))]);
                let reset = futures::stream::once(async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Err(std::io::Error::other("connection reset"))
                });
                Response::new(Body::from_stream(first.chain(reset)))
            }
            (Method::GET, _) => {
                let mut response = Response::new(Body::from("pngbytes"));
                let headers = response.headers_mut();
                let stored = [
                    ("content-type", "image/png"),
                    ("cache-control", "max-age=2592000"),
                    ("x-amz-meta-author", "ada"),
                    ("expires", FAR_EXPIRY),
                    ("x-amz-version-id", "v42"),
                    ("x-amz-storage-class", "STANDARD_IA"),
                ];
                for (name, value) in stored {
                    headers.insert(name, HeaderValue::from_static(value));
                }
                response
            }
            (Method::DELETE, _) => respond(StatusCode::NO_CONTENT, Body::empty()),
            _ => respond(StatusCode::OK, Body::empty()),
        }
    }

    fn fake_config(endpoint: &str) -> StorageConfig {
        StorageConfig::new("media-bucket")
            .with_credentials("AKIATEST", "test-secret")
            .with_host(endpoint)
            .with_dev_mode(true)
    }

    async fn fake_client(endpoint: &str) -> S3Client {
        S3Client::new(&fake_config(endpoint)).await.unwrap()
    }

    #[test]
    fn test_dev_mode_uses_path_style_against_host() {
        let config = StorageConfig::new("media-bucket")
            .with_host("http://localhost:9000")
            .with_dev_mode(true);
        let settings = TransportSettings::from_config(&config);
        assert!(settings.force_path_style);
        let endpoint = settings.endpoint_url.as_deref();
        assert_eq!(endpoint, Some("http://localhost:9000"));
    }

    #[test]
    fn test_production_uses_virtual_hosted_addressing() {
        let config = StorageConfig::new("media-bucket").with_host("http://localhost:9000");
        let settings = TransportSettings::from_config(&config);
        assert!(!settings.force_path_style);
        assert!(settings.endpoint_url.is_none());
    }

    #[tokio::test]
    async fn test_client_is_built_per_config() {
        let dev = StorageConfig::new("dev-bucket")
            .with_credentials("AKIADEV", "dev-secret")
            .with_host("http://localhost:9000")
            .with_dev_mode(true);
        let prod = StorageConfig::new("prod-bucket")
            .with_credentials("AKIAPROD", "prod-secret")
            .with_region("eu-west-1");

        let dev_client = S3Client::new(&dev).await.unwrap();
        let prod_client = S3Client::new(&prod).await.unwrap();

        assert_eq!(dev_client.bucket(), "dev-bucket");
        assert_eq!(prod_client.bucket(), "prod-bucket");
        assert_eq!(
            dev_client.urls.url_for("a.png"),
            "http://localhost:9000/dev-bucket/a.png"
        );
        assert_eq!(
            prod_client.urls.url_for("a.png"),
            "https://prod-bucket.s3.eu-west-1.amazonaws.com/a.png"
        );
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = StorageConfig::new("media-bucket").with_dev_mode(true);
        let result = S3Client::new(&config).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_stream_relays_every_store_header() {
        let (_fake, endpoint) = FakeS3::start().await;
        let client = fake_client(&endpoint).await;

        let object = client.get_object_stream("photo.png").await.unwrap();

        assert_eq!(object.status, StatusCode::OK);
        assert_eq!(object.headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(object.headers[header::CACHE_CONTROL], "max-age=2592000");
        assert_eq!(object.headers["x-amz-meta-author"], "ada");
        assert_eq!(object.headers[header::EXPIRES], FAR_EXPIRY);
        assert_eq!(object.headers["x-amz-version-id"], "v42");
        assert_eq!(object.headers["x-amz-storage-class"], "STANDARD_IA");
        assert!(!object.headers.contains_key(header::TRANSFER_ENCODING));

        let chunks: Vec<_> = object.body.collect().await;
        let body: Vec<u8> = chunks
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect();
        assert_eq!(body, b"pngbytes");
    }

    #[tokio::test]
    async fn test_put_sends_object_metadata() {
        let (fake, endpoint) = FakeS3::start().await;
        let client = fake_client(&endpoint).await;

        let url = client
            .put_object(PutObject {
                key: "media/photo.png".to_string(),
                body: Bytes::from_static(b"pngbytes"),
                acl: "public-read".to_string(),
                cache_control: "max-age=2592000".to_string(),
                content_type: "image/png".to_string(),
                server_side_encryption: None,
            })
            .await
            .unwrap();

        assert_eq!(url, format!("{}/media-bucket/media/photo.png", endpoint));
        let put = fake.last(Method::PUT);
        assert_eq!(put.path, "/media-bucket/media/photo.png");
        assert_eq!(put.headers["x-amz-acl"], "public-read");
        assert_eq!(put.headers[header::CACHE_CONTROL], "max-age=2592000");
        assert_eq!(put.headers[header::CONTENT_TYPE], "image/png");
        assert!(!put.headers.contains_key("x-amz-server-side-encryption"));
    }

    #[tokio::test]
    async fn test_saved_object_carries_encryption_only_when_configured() {
        let (fake, endpoint) = FakeS3::start().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        let file = LogicalFile::new(&path, "text/plain", "a.txt");

        let plain = fake_config(&endpoint);
        let client = Arc::new(S3Client::new(&plain).await.unwrap());
        let store = S3Store::with_client(plain, client);
        store
            .save_with_name(&file, Some("docs"), "a.txt")
            .await
            .unwrap();
        let put = fake.last(Method::PUT);
        assert!(!put.headers.contains_key("x-amz-server-side-encryption"));

        let encrypted = fake_config(&endpoint)
            .with_server_side_encryption("AES256")
            .with_acl("");
        let client = Arc::new(S3Client::new(&encrypted).await.unwrap());
        let store = S3Store::with_client(encrypted, client);
        store
            .save_with_name(&file, Some("docs"), "b.txt")
            .await
            .unwrap();
        let put = fake.last(Method::PUT);
        assert_eq!(put.path, "/media-bucket/docs/b.txt");
        assert_eq!(put.headers["x-amz-server-side-encryption"], "AES256");
        assert!(!put.headers.contains_key("x-amz-acl"));
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let (_fake, endpoint) = FakeS3::start().await;
        let client = fake_client(&endpoint).await;

        let result = client.get_object("missing.png").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        let result = client.get_object_stream("missing.png").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        let result = client.head_object("missing.png").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_denied_access_is_transport_error() {
        let (_fake, endpoint) = FakeS3::start().await;
        let client = fake_client(&endpoint).await;

        let result = client.get_object("forbidden.png").await;
        assert!(matches!(result, Err(StorageError::DownloadFailed(_))));
        let result = client.get_object_stream("forbidden.png").await;
        assert!(matches!(result, Err(StorageError::DownloadFailed(_))));
        let result = client.head_object("forbidden.png").await;
        assert!(matches!(result, Err(StorageError::BackendError(_))));
    }

    #[tokio::test]
    async fn test_interrupted_download_ends_stream_with_error() {
        let (_fake, endpoint) = FakeS3::start().await;
        let client = fake_client(&endpoint).await;

        let object = client.get_object_stream("broken.mp4").await.unwrap();
        let mut chunks: Vec<_> = object.body.collect().await;

        let last = chunks.pop().unwrap();
        assert!(matches!(last, Err(StorageError::DownloadFailed(_))));
        let received: Vec<u8> = chunks
            .into_iter()
            .flat_map(|chunk| chunk.unwrap().to_vec())
            .collect();
        assert_eq!(received, b"abc");
    }

    #[tokio::test]
    async fn test_head_and_delete_hit_the_bucket_path() {
        let (fake, endpoint) = FakeS3::start().await;
        let client = fake_client(&endpoint).await;

        client.head_object("photo.png").await.unwrap();
        client.delete_object("photo.png").await.unwrap();

        assert_eq!(fake.last(Method::HEAD).path, "/media-bucket/photo.png");
        assert_eq!(fake.last(Method::DELETE).path, "/media-bucket/photo.png");
    }
}
