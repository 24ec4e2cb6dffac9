use crate::{
    handlers::diagnostics::diagnostics,
    handlers::health::{health_check, ready_check},
    routes::auth_middleware::auth_middleware,
    AppState,
};
use axum::{routing::get, Router, middleware};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/diagnostics", get(diagnostics))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), auth_middleware)) // Applies to all routes added above
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .with_state(app_state)
}
