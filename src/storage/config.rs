//! Backend selection and decorator layering for data stores

use crate::config::StorageConfig;
use crate::error::TusResult;
use crate::storage::{
    limited_store::LimitedStore, local_store::LocalStore, memory_locker::MemoryLocker,
    memory_store::MemoryStore, DataStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use log::info;

/// Available data store backends
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "file" | "filesystem" => Ok(StorageBackend::Local),
            "memory" | "mem" => Ok(StorageBackend::Memory),
            _ => Err(format!("Unknown storage backend: {}", s)),
        }
    }
}

/// Create the configured backend and wrap it in the configured decorators.
///
/// Layering, innermost first: backend, `MemoryLocker` (if `locking`),
/// `LimitedStore` (if `capacity` is set).
pub fn create_store(config: &StorageConfig) -> TusResult<Arc<dyn DataStore>> {
    let mut store: Arc<dyn DataStore> = match config.backend {
        StorageBackend::Local => {
            info!("Using local storage backend in {}", config.directory);
            Arc::new(LocalStore::new(config)?)
        }
        StorageBackend::Memory => {
            info!("Using in-memory storage backend");
            Arc::new(MemoryStore::new())
        }
    };

    if config.locking {
        info!("Enabling in-memory upload locks");
        store = Arc::new(MemoryLocker::new(store));
    }

    if let Some(capacity) = config.capacity {
        store = Arc::new(LimitedStore::new(capacity, store)?);
    }

    Ok(store)
}
