use std::panic;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use uml_collab::clients::app_service_client::AppServiceClient;
use uml_collab::collab::router::EventRouter;
use uml_collab::collab::sweeper;
use uml_collab::config::Config;
use uml_collab::db::dbdiagram::DbDiagrams;
use uml_collab::services::auth_service::AuthService;
use uml_collab::storage::memory::{InMemoryDiagramStore, InMemoryIdentityProvider};
use uml_collab::storage::{DiagramStore, IdentityProvider};
use uml_collab::{create_app, AppState};

#[tokio::main(flavor = "current_thread")]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "uml_collab=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    // Diagram storage collaborator: Postgres when configured, otherwise a
    // permissive in-memory stand-in
    let diagrams: Arc<dyn DiagramStore> = if let Some(db_url) = &config.db_url {
        match DbDiagrams::new(db_url).await {
            Ok(db) => {
                info!("Database initialized successfully");
                Arc::new(db)
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                warn!("Diagram existence checks are disabled");
                Arc::new(InMemoryDiagramStore::allow_all())
            }
        }
    } else {
        warn!("No database URL configured - diagram existence checks are disabled");
        Arc::new(InMemoryDiagramStore::allow_all())
    };

    // Identity collaborator
    let identity: Arc<dyn IdentityProvider> = if let Some(app_service_url) = &config.app_service_url {
        Arc::new(AppServiceClient::new(
            app_service_url.clone(),
            config.cloud_auth_jwt_secret.clone().unwrap_or_default(),
            config.cloud_service_name.clone(),
        ))
    } else {
        warn!("No app service URL configured - WebSocket connections cannot be authenticated");
        Arc::new(InMemoryIdentityProvider::new())
    };

    let auth = Arc::new(AuthService::new(identity, config.cloud_auth_jwt_secret.clone()));
    let router = Arc::new(EventRouter::new(Duration::from_secs(config.lock_timeout_secs)));

    // Reclaim abandoned element locks in the background
    sweeper::spawn(router.clone(), Duration::from_secs(config.lock_sweep_interval_secs));

    let app_state = Arc::new(AppState {
        config: config.clone(),
        router,
        auth,
        diagrams,
    });
    let app_routes = create_app(app_state);

    // Start the HTTP server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/ws", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
