//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`, with `/health` also mounted at the root.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Delivery
        .route("/messages", post(handlers::delivery::send_message))
        .route(
            "/messages/{id}",
            get(handlers::delivery::get_message).delete(handlers::delivery::cancel_delivery),
        )
        .route(
            "/messages/{id}/confirm",
            post(handlers::delivery::confirm_delivery),
        )
        .route("/messages/{id}/read", post(handlers::delivery::mark_as_read))
        .route(
            "/messages/{id}/retry",
            post(handlers::delivery::retry_message),
        )
        .route(
            "/deliveries/stats",
            get(handlers::delivery::get_statistics),
        )
        // Streams
        .route("/streams", post(handlers::stream::create_stream))
        .route(
            "/streams/multiplex",
            post(handlers::stream::create_multiplex),
        )
        .route("/streams/{id}", delete(handlers::stream::cancel_stream))
        .route(
            "/sessions/{id}/streams",
            get(handlers::stream::list_session_streams)
                .delete(handlers::stream::cancel_session_streams),
        )
        // Transport channels
        .route(
            "/channels/{id}/events",
            get(handlers::channel::subscribe),
        )
        .route("/channels/{id}", delete(handlers::channel::disconnect))
        .route("/envelopes", post(handlers::channel::receive_envelope))
        // Health
        .route("/health", get(handlers::health::health));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(handlers::health::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
