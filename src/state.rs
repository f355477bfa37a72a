use std::sync::Arc;

use crate::config::AppConfig;
use crate::relay::Relay;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration the process started with
    pub config: AppConfig,
    /// Camera session and browser peer
    pub relay: Arc<Relay>,
}

impl AppState {
    pub fn new(config: AppConfig, relay: Arc<Relay>) -> Arc<Self> {
        Arc::new(Self { config, relay })
    }
}
