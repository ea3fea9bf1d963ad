use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::handlers;
use crate::ws;

/// Build the full router: realtime channel, HTTP gateway and static fallback.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Realtime session channel
        .route("/ws", get(ws::ws_handler))
        // Version probe
        .route("/api", get(handlers::api))
        // Uploads enforce a per-file cap while streaming instead
        .route(
            "/upload",
            post(handlers::upload).layer(DefaultBodyLimit::disable()),
        )
        // Everything else is a static asset
        .fallback(get(handlers::serve_static))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
