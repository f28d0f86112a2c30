//! Public object serving
//!
//! Streams the object behind the request path straight from the bucket. A
//! request that cannot be fetched gets an empty 404; the failure itself is
//! attached to the response as a [`ServeFailure`] extension so outer layers
//! can inspect it.

use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mediabucket_storage::ServeOutcome;
use std::sync::Arc;

/// Why a serve request ended in a 404
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeFailure {
    pub key: String,
    pub message: String,
}

#[tracing::instrument(skip_all, fields(path = %path))]
pub async fn serve_object(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> Response {
    match state.proxy.open(&format!("/{}", path)).await {
        ServeOutcome::Streaming {
            status,
            headers,
            body,
        } => {
            let mut response = Response::new(Body::from_stream(body));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        ServeOutcome::Failed { key, error } => {
            let mut response = StatusCode::NOT_FOUND.into_response();
            response.extensions_mut().insert(ServeFailure {
                key,
                message: error.to_string(),
            });
            response
        }
    }
}
