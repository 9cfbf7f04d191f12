//! In-memory stand-in for the render service.
//!
//! Jobs advance one step per progress query instead of on a clock, so a
//! client polling faster simply finishes sooner.

pub mod error;
pub mod routes;
pub mod state;

use axum::{
    routing::{delete, get, post},
    Router,
};
use state::StubState;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn app(state: StubState) -> Router {
    // The editor runs on a different origin during development.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/exports", post(routes::create_export))
        .route("/api/exports/{token}", delete(routes::delete_export))
        .route("/api/exports/{token}/progress", get(routes::export_progress))
        .route("/api/exports/{token}/download", get(routes::download_export))
        .route("/api/uploads/{id}", delete(routes::delete_upload))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
