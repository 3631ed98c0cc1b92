//! tus resumable upload protocol on top of a `DataStore`.
//!
//! `UnroutedHandler` holds the data store, the capabilities probed from it
//! when the server is assembled, and the channel completed uploads are
//! published on. `routes::configure` mounts the endpoints; which ones exist
//! depends on those capabilities and never changes afterwards.

pub mod handlers;
pub mod metadata;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use actix_web::HttpRequest;
use log::{debug, info, warn};
use tokio::sync::broadcast;

use crate::config::TusConfig;
use crate::error::TusResult;
use crate::storage::{Capabilities, DataStore, FileInfo, LockerDataStore};

/// The only protocol version spoken by this server
pub const TUS_VERSION: &str = "1.0.0";

pub const TUS_RESUMABLE: &str = "Tus-Resumable";
pub const TUS_VERSION_HEADER: &str = "Tus-Version";
pub const TUS_EXTENSION: &str = "Tus-Extension";
pub const TUS_MAX_SIZE: &str = "Tus-Max-Size";
pub const UPLOAD_LENGTH: &str = "Upload-Length";
pub const UPLOAD_OFFSET: &str = "Upload-Offset";
pub const UPLOAD_METADATA: &str = "Upload-Metadata";
pub const UPLOAD_CONCAT: &str = "Upload-Concat";
pub const METHOD_OVERRIDE: &str = "X-HTTP-Method-Override";
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";

const COMPLETE_UPLOADS_CAPACITY: usize = 64;

pub struct UnroutedHandler {
    config: TusConfig,
    store: Arc<dyn DataStore>,
    capabilities: Capabilities,
    extensions: String,
    complete_uploads: broadcast::Sender<FileInfo>,
}

impl UnroutedHandler {
    pub fn new(mut config: TusConfig, store: Arc<dyn DataStore>) -> Self {
        config.base_path = normalize_base_path(&config.base_path);

        let capabilities = Capabilities::probe(store.as_ref());
        let extensions = capabilities.extensions().join(",");
        info!(
            "Serving tus {} under {} with extensions [{}]",
            TUS_VERSION, config.base_path, extensions
        );
        if !capabilities.locker {
            warn!("Data store cannot lock uploads, concurrent writes are not guarded");
        }

        let (complete_uploads, _) = broadcast::channel(COMPLETE_UPLOADS_CAPACITY);
        Self {
            config,
            store,
            capabilities,
            extensions,
            complete_uploads,
        }
    }

    pub fn config(&self) -> &TusConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn DataStore {
        self.store.as_ref()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Comma separated list for the `Tus-Extension` header
    pub fn extensions(&self) -> &str {
        &self.extensions
    }

    /// Receive every upload that completes from now on
    pub fn complete_uploads(&self) -> broadcast::Receiver<FileInfo> {
        self.complete_uploads.subscribe()
    }

    fn notify_complete(&self, info: FileInfo) {
        if !self.config.notify_complete_uploads {
            return;
        }
        if self.complete_uploads.send(info).is_err() {
            debug!("No subscriber for completed uploads");
        }
    }

    /// Lock an upload for the lifetime of the returned guard.
    ///
    /// Stores without the locking capability hand out a guard that holds nothing.
    fn lock_upload<'a>(&'a self, id: &'a str) -> TusResult<UploadLock<'a>> {
        let locker = self.store.as_locker();
        if let Some(locker) = locker {
            locker.lock_upload(id)?;
        }
        Ok(UploadLock { locker, id })
    }

    /// Absolute URL of an upload, as sent in `Location`
    fn upload_url(&self, req: &HttpRequest, id: &str) -> String {
        let conn = req.connection_info();
        format!("{}://{}{}{}", conn.scheme(), conn.host(), self.config.base_path, id)
    }
}

/// Releases the upload lock when dropped
struct UploadLock<'a> {
    locker: Option<&'a dyn LockerDataStore>,
    id: &'a str,
}

impl Drop for UploadLock<'_> {
    fn drop(&mut self) {
        if let Some(locker) = self.locker {
            if let Err(e) = locker.unlock_upload(self.id) {
                warn!("Failed to unlock upload {}: {}", self.id, e);
            }
        }
    }
}

/// Ensure the base path starts and ends with a slash
fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}
