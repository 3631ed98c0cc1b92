//! Application State Management
//!
//! This module assembles the data store stack and the tus handler from the
//! configuration, following the dependency injection pattern.

use std::sync::Arc;
use log::info;

use crate::config::AppConfig;
use crate::error::TusResult;
use crate::storage::config::create_store;
use crate::storage::memory_store::MemoryStore;
use crate::storage::DataStore;
use crate::tus::UnroutedHandler;

/// Application state containing the handler and its dependencies
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<UnroutedHandler>,
    pub config: AppConfig,
}

impl AppState {
    /// Create application state from configuration
    pub fn from_config(config: AppConfig) -> TusResult<Self> {
        info!("Initializing application state with configuration");

        let store = create_store(&config.storage)?;
        Ok(Self::with_store(config, store))
    }

    /// Create application state around an already assembled data store
    pub fn with_store(config: AppConfig, store: Arc<dyn DataStore>) -> Self {
        let handler = Arc::new(UnroutedHandler::new(config.tus.clone(), store));

        info!("Application state initialized successfully");
        Self { handler, config }
    }

    /// Create application state for testing with an in-memory backend
    pub fn new_for_testing() -> Self {
        Self::with_store(AppConfig::default(), Arc::new(MemoryStore::new()))
    }
}
