use std::path::Path;

use axum::{http::Uri, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::handlers::{events, history, status};
use crate::state::AppState;

pub fn create_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let routes = Router::new()
        .route("/events", get(events::stream_events))
        .route("/history", get(history::get_history))
        .route("/status", get(status::get_status))
        .route("/health", get(status::get_health));

    let routes = match static_dir {
        Some(dir) => routes.fallback_service(ServeDir::new(dir)),
        None => routes.fallback(not_found),
    };

    routes
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}
