pub mod auth;
pub mod clients;
pub mod collab;
pub mod config;
pub mod db;
pub mod docs;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;
pub mod websocket;

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use collab::router::EventRouter;
use config::Config;
use services::auth_service::AuthService;
use storage::DiagramStore;

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub router: Arc<EventRouter>,
    pub auth: Arc<AuthService>,
    pub diagrams: Arc<dyn DiagramStore>,
}

/// Assemble the full application router: REST surface, WebSocket endpoint,
/// Swagger UI and the tracing/CORS layers.
pub fn create_app(app_state: Arc<AppState>) -> Router {
    let cors = match app_state.config.cors_origins.as_deref() {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    };

    let api_routes = routes::api::create_api_routes(app_state.clone());

    Router::new()
        .route("/ws", get(websocket::handler::websocket_handler))
        .with_state(app_state)
        // Mount API routes
        .nest("/api", api_routes)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", docs::ApiDoc::openapi()))
        .layer(cors)
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
}
