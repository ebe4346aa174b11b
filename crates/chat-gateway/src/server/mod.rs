//! Gateway server setup
//!
//! Provides the main WebSocket server configuration and routes.

mod handler;
mod state;

pub use handler::gateway_handler;
pub use state::GatewayState;

use axum::{routing::get, Router};
use chat_common::{AppConfig, AppError, JwtService};
use chat_realtime::{ChatHub, HubStores};
use chat_store::{MemoryMessageStore, MemoryRoomStore, MemoryUserDirectory};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Create the gateway router
pub fn create_router() -> Router<GatewayState> {
    Router::new()
        .route("/gateway", get(gateway_handler))
        .route("/health", get(health_check))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Build the complete application
pub fn create_app(state: GatewayState) -> Router {
    create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Initialize all dependencies and create `GatewayState`
///
/// Must be called inside a Tokio runtime: the idle-connection reaper is
/// spawned here.
pub async fn create_gateway_state(config: AppConfig) -> Result<GatewayState, AppError> {
    let directory = Arc::new(MemoryUserDirectory::new());
    let stores = HubStores {
        messages: Arc::new(MemoryMessageStore::new()),
        rooms: Arc::new(MemoryRoomStore::new()),
        users: directory.clone(),
    };

    let hub = Arc::new(ChatHub::new(
        config.realtime.clone(),
        &config.rate_limit,
        stores,
        config.snowflake.worker_id,
    ));

    let rooms = hub.bootstrap_rooms(&config.rooms.defaults).await?;
    tracing::info!(rooms = rooms.len(), "Default rooms ready");

    hub.spawn_reaper(config.realtime.heartbeat_interval());

    let jwt = Arc::new(JwtService::new(&config.jwt.secret, config.jwt.access_token_expiry));

    Ok(GatewayState::new(hub, jwt, directory, config))
}

/// Serve the gateway on an already-bound listener
pub async fn serve(app: Router, listener: TcpListener) -> Result<(), AppError> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Gateway listening on ws://{}/gateway", addr);
    }

    axum::serve(listener, app).await?;

    Ok(())
}

/// Run the gateway server
pub async fn run_server(app: Router, addr: SocketAddr) -> Result<(), AppError> {
    tracing::info!("Starting Gateway server on {}", addr);

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to bind");
        e
    })?;

    serve(app, listener).await
}

/// Run the complete gateway server with configuration
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let addr: SocketAddr = config
        .gateway
        .address()
        .parse()
        .map_err(|e| AppError::Validation(format!("Invalid gateway address {}: {e}", config.gateway.address())))?;

    // Create gateway state
    let state = create_gateway_state(config).await?;

    // Build application
    let app = create_app(state);

    // Run server
    run_server(app, addr).await
}
