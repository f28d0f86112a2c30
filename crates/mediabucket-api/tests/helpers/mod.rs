//! Test helpers: a router backed by an in-memory bucket.

use axum_test::TestServer;
use mediabucket_api::setup::routes;
use mediabucket_api::state::AppState;
use mediabucket_core::StorageConfig;
use mediabucket_storage::{MemoryClient, S3Store, ServeErrorHandler, StorageError};
use std::sync::{Arc, Mutex};

pub const SERVE_BASE_PATH: &str = "/content/images";

/// Serve failures seen by the proxy, as `(key, message)`
#[derive(Default)]
pub struct RecordedFailures(Mutex<Vec<(String, String)>>);

impl RecordedFailures {
    pub fn keys(&self) -> Vec<String> {
        let recorded = self.0.lock().unwrap();
        recorded.iter().map(|(key, _)| key.clone()).collect()
    }
}

impl ServeErrorHandler for RecordedFailures {
    fn on_error(&self, key: &str, error: &StorageError) {
        self.0
            .lock()
            .unwrap()
            .push((key.to_string(), error.to_string()));
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub store: S3Store,
    pub client: Arc<MemoryClient>,
    pub failures: Arc<RecordedFailures>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(StorageConfig::new("media-bucket").with_path_prefix("media"))
    }

    pub fn with_config(config: StorageConfig) -> Self {
        let client = Arc::new(MemoryClient::for_config(&config).with_chunk_size(4));
        let store = S3Store::with_client(config, client.clone());
        let failures = Arc::new(RecordedFailures::default());
        let state = AppState::new(store.clone()).with_error_handler(failures.clone());
        let app = routes::setup_routes(SERVE_BASE_PATH, Arc::new(state));
        let server =
            TestServer::new(app.into_make_service()).expect("Failed to create test server");

        TestApp {
            server,
            store,
            client,
            failures,
        }
    }
}

pub fn serve_path(path: &str) -> String {
    format!("{}{}", SERVE_BASE_PATH, path)
}
