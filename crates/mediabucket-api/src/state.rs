use mediabucket_storage::{S3Store, ServeErrorHandler, StreamProxy};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: S3Store,
    pub proxy: StreamProxy,
}

impl AppState {
    pub fn new(store: S3Store) -> Self {
        let proxy = store.serve();
        AppState { store, proxy }
    }

    /// Route serve failures to `handler` instead of the log.
    pub fn with_error_handler(mut self, handler: Arc<dyn ServeErrorHandler>) -> Self {
        self.proxy = self.proxy.with_error_handler(handler);
        self
    }
}
