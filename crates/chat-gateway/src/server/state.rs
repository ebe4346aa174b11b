//! Gateway state
//!
//! Application state for the gateway server.

use chat_common::{AppConfig, JwtService};
use chat_realtime::ChatHub;
use chat_store::MemoryUserDirectory;
use std::sync::Arc;

/// Gateway application state
///
/// Holds all shared dependencies for the gateway server.
#[derive(Clone)]
pub struct GatewayState {
    /// Realtime core
    hub: Arc<ChatHub>,
    /// Access token verification
    jwt: Arc<JwtService>,
    /// Authenticated users are enrolled here on first connect
    directory: Arc<MemoryUserDirectory>,
    /// Application configuration
    config: Arc<AppConfig>,
}

impl GatewayState {
    /// Create a new gateway state
    pub fn new(hub: Arc<ChatHub>, jwt: Arc<JwtService>, directory: Arc<MemoryUserDirectory>, config: AppConfig) -> Self {
        Self {
            hub,
            jwt,
            directory,
            config: Arc::new(config),
        }
    }

    pub fn hub(&self) -> &Arc<ChatHub> {
        &self.hub
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    pub fn directory(&self) -> &MemoryUserDirectory {
        &self.directory
    }

    /// Get the application configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("connections", &self.hub.registry().len())
            .field("config", &"AppConfig")
            .finish()
    }
}
