use crate::handlers::{health::health_check, serve::serve_object};
use crate::state::AppState;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the router, serving objects under `serve_base_path`.
pub fn setup_routes(serve_base_path: &str, state: Arc<AppState>) -> Router {
    let serve_routes = Router::new().route("/{*path}", get(serve_object));

    let router = Router::new().route("/health", get(health_check));
    let base = serve_base_path.trim_end_matches('/');
    let router = if base.is_empty() {
        router.merge(serve_routes)
    } else {
        router.nest(base, serve_routes)
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
