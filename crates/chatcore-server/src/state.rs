//! Shared application state: one value, cloned cheaply into every handler,
//! holding the config and the registry of resident session actors.

use std::sync::Arc;

use chatcore_session::ModelDriver;

use crate::config::ServerConfig;
use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: SessionRegistry,
}

impl AppState {
    pub fn new(config: ServerConfig, model: Arc<dyn ModelDriver>) -> Self {
        let registry = SessionRegistry::new(
            config.max_resident_sessions,
            config.session_ttl,
            model,
            config.session.clone(),
            config.data_dir.clone(),
        );
        Self {
            config: Arc::new(config),
            registry,
        }
    }
}
