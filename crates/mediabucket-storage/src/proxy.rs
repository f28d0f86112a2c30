//! Serving stored objects over HTTP
//!
//! Each request runs through a small state machine:
//!
//! ```text
//! Fetching -> HeadersReceived -> Streaming -> Done
//!     \              \               \
//!      `--------------`---------------`--> Failed
//! ```
//!
//! A failure before the headers arrive yields [`ServeOutcome::Failed`], which
//! the HTTP layer turns into a 404 with no body. A failure while streaming
//! ends the body stream with that error. In both cases the error goes to the
//! session's [`ServeErrorHandler`]. Nothing is retried.

use bytes::Bytes;
use futures::Stream;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use crate::keys;
use crate::traits::{ByteStream, ObjectClient, StorageError, StorageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeState {
    Fetching,
    HeadersReceived,
    Streaming,
    Done,
    Failed,
}

impl ServeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ServeState::Done | ServeState::Failed)
    }
}

/// Error continuation for failed serves.
pub trait ServeErrorHandler: Send + Sync {
    fn on_error(&self, key: &str, error: &StorageError);
}

/// Logs failed serves and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogServeErrors;

impl ServeErrorHandler for LogServeErrors {
    fn on_error(&self, key: &str, error: &StorageError) {
        match error {
            StorageError::NotFound(_) => {
                tracing::debug!(key = %key, "Requested object does not exist")
            }
            other => tracing::warn!(error = %other, key = %key, "Failed to serve object"),
        }
    }
}

struct ServeSession {
    key: String,
    state: ServeState,
    on_error: Arc<dyn ServeErrorHandler>,
    bytes_sent: u64,
    started: Instant,
}

impl ServeSession {
    fn new(key: String, on_error: Arc<dyn ServeErrorHandler>) -> Self {
        ServeSession {
            key,
            state: ServeState::Fetching,
            on_error,
            bytes_sent: 0,
            started: Instant::now(),
        }
    }

    fn transition(&mut self, next: ServeState) {
        tracing::trace!(key = %self.key, from = ?self.state, to = ?next, "Serve state change");
        self.state = next;
    }

    fn fail(&mut self, error: &StorageError) {
        self.transition(ServeState::Failed);
        self.on_error.on_error(&self.key, error);
    }

    fn finish(&mut self) {
        self.transition(ServeState::Done);
        tracing::debug!(
            key = %self.key,
            size_bytes = self.bytes_sent,
            duration_ms = self.started.elapsed().as_secs_f64() * 1000.0,
            "Object served"
        );
    }
}

/// Body of a serve whose headers have been received.
///
/// Chunks are pulled from the store only as the consumer polls, so at most
/// one chunk is held in memory.
pub struct ServeBody {
    inner: ByteStream,
    session: ServeSession,
}

impl ServeBody {
    pub fn state(&self) -> ServeState {
        self.session.state
    }

    pub fn bytes_sent(&self) -> u64 {
        self.session.bytes_sent
    }
}

impl fmt::Debug for ServeBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServeBody")
            .field("key", &self.session.key)
            .field("state", &self.session.state)
            .field("bytes_sent", &self.session.bytes_sent)
            .finish()
    }
}

impl Stream for ServeBody {
    type Item = StorageResult<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.session.state.is_terminal() {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.session.bytes_sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => {
                this.session.fail(&error);
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                this.session.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Result of opening a serve request.
#[derive(Debug)]
pub enum ServeOutcome {
    /// Headers are in; the body streams on demand.
    Streaming {
        status: StatusCode,
        headers: HeaderMap,
        body: ServeBody,
    },
    /// The fetch failed before any byte was produced.
    Failed { key: String, error: StorageError },
}

/// Proxies objects from the store to HTTP clients.
#[derive(Clone)]
pub struct StreamProxy {
    client: Arc<dyn ObjectClient>,
    prefix: String,
    on_error: Arc<dyn ServeErrorHandler>,
}

impl StreamProxy {
    pub fn new(client: Arc<dyn ObjectClient>, prefix: impl Into<String>) -> Self {
        StreamProxy {
            client,
            prefix: prefix.into(),
            on_error: Arc::new(LogServeErrors),
        }
    }

    pub fn with_error_handler(mut self, on_error: Arc<dyn ServeErrorHandler>) -> Self {
        self.on_error = on_error;
        self
    }

    /// Object key for an inbound request path
    pub fn key_for(&self, request_path: &str) -> String {
        keys::serve_key(&self.prefix, request_path)
    }

    pub async fn open(&self, request_path: &str) -> ServeOutcome {
        let key = self.key_for(request_path);
        let mut session = ServeSession::new(key.clone(), self.on_error.clone());

        if key.is_empty() || keys::has_parent_segment(&key) {
            let error = StorageError::InvalidKey(key.clone());
            session.fail(&error);
            return ServeOutcome::Failed { key, error };
        }

        match self.client.get_object_stream(&key).await {
            Ok(object) => {
                session.transition(ServeState::HeadersReceived);
                let status = object.status;
                let headers = object.headers;
                session.transition(ServeState::Streaming);
                ServeOutcome::Streaming {
                    status,
                    headers,
                    body: ServeBody {
                        inner: object.body,
                        session,
                    },
                }
            }
            Err(error) => {
                session.fail(&error);
                ServeOutcome::Failed { key, error }
            }
        }
    }
}

impl fmt::Debug for StreamProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamProxy")
            .field("bucket", &self.client.bucket())
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
