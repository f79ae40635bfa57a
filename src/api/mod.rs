pub mod error;
pub mod handlers;

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, Any, CorsLayer},
    services::ServeDir,
};
use tracing::{info, warn};

use handlers::{authenticate, get_config, list_categories, search_emails, AppState};

/// Build the API router
pub fn create_router(state: AppState, frontend_url: &str, static_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/api/auth", post(authenticate))
        .route("/api/categories", get(list_categories))
        .route("/api/config", get(get_config))
        .route("/api/search", post(search_emails))
        .with_state(Arc::new(state));

    // Serve a built frontend, if one was provided
    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router.layer(cors_layer(frontend_url))
}

/// `*` allows any origin; anything else allows that origin with credentials
fn cors_layer(frontend_url: &str) -> CorsLayer {
    if frontend_url != "*" {
        match frontend_url.parse::<HeaderValue>() {
            Ok(origin) => {
                return CorsLayer::new()
                    .allow_origin(origin)
                    .allow_credentials(true)
                    .allow_methods(AllowMethods::mirror_request())
                    .allow_headers(AllowHeaders::mirror_request());
            }
            Err(e) => warn!("Ignoring invalid FRONTEND_URL {:?}: {}", frontend_url, e),
        }
    }

    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Start the API server with graceful shutdown support
pub async fn start_server_with_shutdown(
    router: Router,
    port: u16,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let shutdown_signal = async {
        shutdown_signal.await;
        info!("🛑 Shutdown signal received, stopping server gracefully...");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("✅ API server stopped gracefully");
    Ok(())
}
