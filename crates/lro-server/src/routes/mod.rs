//! API route modules.

pub mod health;
pub mod operations;

use axum::{Router, middleware, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::middleware::auth_middleware;
use crate::state::AppState;

/// Create the main router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes (no auth)
    let public_routes = Router::new().route("/health", get(health::health_check));

    // Protected routes (require auth)
    let protected_routes = Router::new()
        .merge(operations::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .nest("/api", protected_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
