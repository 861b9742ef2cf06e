//! Shared application state

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use voicebridge_config::constants::server as server_constants;
use voicebridge_config::Settings;

use crate::registry::ConnectionRegistry;
use crate::signaling::build_discovery;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Configuration behind a lock for hot-reload
    pub config: Arc<RwLock<Settings>>,
    /// Discovery payload, computed once at startup and reused per request
    pub discovery: Arc<Value>,
    /// Live connections
    pub connections: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(config: Settings) -> Self {
        let discovery = Arc::new(build_discovery(&config));
        Self {
            config: Arc::new(RwLock::new(config)),
            discovery,
            connections: Arc::new(ConnectionRegistry::new(server_constants::MAX_CONNECTIONS)),
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self::new(Settings::default())
    }
}
