//! Router setup with routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression, and the
//! authentication layer on protected endpoints.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use coach_core::error::CoachError;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // CORS: the configured origin list, or localhost on the configured
    // port plus port+1 (dev server) when none is given.
    let configured = if state.allowed_origins.is_empty() {
        let port = state.port;
        let dev_port = port.saturating_add(1);
        vec![
            format!("http://127.0.0.1:{}", port),
            format!("http://localhost:{}", port),
            format!("http://127.0.0.1:{}", dev_port),
            format!("http://localhost:{}", dev_port),
        ]
    } else {
        state.allowed_origins.clone()
    };
    let origins: Vec<HeaderValue> = configured.iter().filter_map(|o| o.parse().ok()).collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let public_routes = Router::new().route("/health", get(handlers::health));

    let protected_routes = Router::new()
        .route("/coach", post(handlers::coach))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_user,
        ));

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(256 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server, bound to localhost on the state's port.
pub async fn start_server(state: AppState) -> Result<(), CoachError> {
    let addr = format!("127.0.0.1:{}", state.port);
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CoachError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| CoachError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
