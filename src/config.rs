//! Application Configuration
//!
//! This module provides configuration management for the application,
//! supporting YAML configuration files with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use log::{info, warn};

pub use crate::storage::config::StorageBackend;

/// Environment variable naming an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "TUS_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Protocol handler configuration
    pub tus: TusConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// File this configuration was read from, `None` when defaults are used
    #[serde(skip)]
    pub loaded_from: Option<String>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Number of worker threads
    pub workers: usize,
}

/// Protocol handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TusConfig {
    /// URL path the upload endpoints are mounted under, e.g. "/files/"
    pub base_path: String,
    /// Largest upload a client may announce in bytes, 0 for no limit
    pub max_size: u64,
    /// Publish every completed upload on the completion channel
    pub notify_complete_uploads: bool,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackend,
    /// Directory for the local backend
    pub directory: String,
    /// Total bytes across all uploads; uploads get evicted past it. Unlimited when absent
    pub capacity: Option<u64>,
    /// Guard uploads with in-memory exclusive locks
    pub locking: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Path to log configuration file
    pub config_file: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1080,
            workers: 4,
        }
    }
}

impl Default for TusConfig {
    fn default() -> Self {
        Self {
            base_path: "/files/".to_string(),
            max_size: 0,
            notify_complete_uploads: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            directory: "./data/uploads".to_string(),
            capacity: None,
            locking: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            config_file: "server_log.yaml".to_string(),
        }
    }
}

impl AppConfig {
    /// Path of the configuration file: `$TUS_CONFIG` or `config.yaml`
    pub fn config_path() -> String {
        env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Load configuration from `$TUS_CONFIG` or `config.yaml`, use defaults if not found
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_from(&Self::config_path())
    }

    /// Loading happens before the logger exists; call `log_source` once it does.
    pub fn load_from(config_path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        if Path::new(config_path).exists() {
            let content = fs::read_to_string(config_path)?;
            let mut config: AppConfig = serde_yaml::from_str(&content)?;
            config.loaded_from = Some(config_path.to_string());
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Report where the configuration came from
    pub fn log_source(&self) {
        match &self.loaded_from {
            Some(path) => info!("Loaded configuration from {}", path),
            None => warn!("Config file {} not found, using defaults", Self::config_path()),
        }
    }
}
