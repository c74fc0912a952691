mod health;
mod metrics;
mod ask;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use ask::ask_handler;

use axum::{Router, routing::{get, post}};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use crate::state::AppState;

// The worker UI calls /api/ask straight from the browser, hence permissive CORS
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/ask", post(ask_handler))
        .route("/metrics", get(metrics_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
