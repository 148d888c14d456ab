//! Axum router configuration

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::metrics::metrics_handler;
use crate::state::AppState;

use super::handlers::{health_check, version_check};
use super::overlays::{create_overlay, delete_overlay, get_overlay, list_overlays, update_overlay};
use super::streams::{
    create_stream, delete_stream, get_stream, list_streams, restart_stream, stop_stream,
    update_stream,
};

/// Create the Axum router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    // Players fetch playlists and segments cross-origin, with range requests.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
            Method::HEAD,
        ])
        .allow_headers([
            header::ACCEPT,
            header::RANGE,
            header::CONTENT_TYPE,
            header::ORIGIN,
        ])
        .max_age(Duration::from_secs(3600));

    // Segment output, one directory per stream
    let live = ServeDir::new(&state.config.transcoder.output_root);

    let router = Router::new()
        // Health, version and metrics endpoints
        .route("/health", get(health_check))
        .route("/version", get(version_check))
        .route("/metrics", get(metrics_handler))
        // Streams
        .route("/streams", post(create_stream).get(list_streams))
        .route(
            "/streams/{id}",
            get(get_stream).patch(update_stream).delete(delete_stream),
        )
        .route("/streams/{id}/stop", post(stop_stream))
        .route("/streams/{id}/restart", post(restart_stream))
        // Overlays
        .route(
            "/streams/{id}/overlays",
            post(create_overlay).get(list_overlays),
        )
        .route(
            "/overlays/{id}",
            get(get_overlay).patch(update_overlay).delete(delete_overlay),
        )
        .nest_service("/live", live)
        .layer(TraceLayer::new_for_http());

    let router = if state.config.cors_enabled {
        router.layer(cors)
    } else {
        router
    };

    router.with_state(state)
}
