//! Upload Storage Layer Abstraction
//!
//! This module provides the data store interface behind the tus handlers.
//! Every backend implements the `DataStore` baseline (create, write, status).
//! Everything else is an optional capability: a backend opts in by returning
//! itself from the matching `as_*` probe, and callers check the probe before
//! invoking the capability.

pub mod config;
pub mod limited_store;
pub mod local_store;
pub mod memory_locker;
pub mod memory_store;


use std::collections::HashMap;
use std::io::Read;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TusResult;

/// Upload identifier type
pub type UploadId = String;

/// Everything the server knows about a single upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileInfo {
    /// Unique id, assigned by the data store on creation
    #[serde(default)]
    pub id: UploadId,
    /// Declared total length in bytes
    pub size: u64,
    /// Number of bytes received so far
    #[serde(default)]
    pub offset: u64,
    /// Client supplied metadata (`Upload-Metadata`)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Upload is a partial upload of a later concatenation
    #[serde(default)]
    pub is_partial: bool,
    /// Upload is the result of a concatenation
    #[serde(default)]
    pub is_final: bool,
    /// Ids of the partial uploads a final upload consists of
    #[serde(default)]
    pub partial_uploads: Vec<UploadId>,
    pub created_at: DateTime<Utc>,
}

impl FileInfo {
    /// Create the info for a fresh upload of the given declared size
    pub fn new(size: u64) -> Self {
        Self {
            id: String::new(),
            size,
            offset: 0,
            metadata: HashMap::new(),
            is_partial: false,
            is_final: false,
            partial_uploads: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// All declared bytes have been received
    pub fn is_complete(&self) -> bool {
        self.offset == self.size
    }
}

/// Baseline contract every backend satisfies
pub trait DataStore: Send + Sync {
    /// Allocate a new upload and return its id
    fn new_upload(&self, info: FileInfo) -> TusResult<UploadId>;

    /// Write `src` at `offset` and return the number of bytes written
    fn write_chunk(&self, id: &str, offset: u64, src: &[u8]) -> TusResult<u64>;

    /// Current state of an upload
    fn get_info(&self, id: &str) -> TusResult<FileInfo>;

    fn as_terminater(&self) -> Option<&dyn TerminaterDataStore> {
        None
    }

    fn as_reader(&self) -> Option<&dyn GetReaderDataStore> {
        None
    }

    fn as_locker(&self) -> Option<&dyn LockerDataStore> {
        None
    }

    fn as_finisher(&self) -> Option<&dyn FinisherDataStore> {
        None
    }

    fn as_concater(&self) -> Option<&dyn ConcaterDataStore> {
        None
    }
}

/// Delete an upload and everything stored for it
pub trait TerminaterDataStore: Send + Sync {
    fn terminate(&self, id: &str) -> TusResult<()>;
}

/// Read back the bytes received so far
pub trait GetReaderDataStore: Send + Sync {
    fn get_reader(&self, id: &str) -> TusResult<Box<dyn Read + Send>>;
}

/// Exclusive, non-blocking per-upload locks
pub trait LockerDataStore: Send + Sync {
    /// Fails with `TusError::FileLocked` if the upload is already locked
    fn lock_upload(&self, id: &str) -> TusResult<()>;

    /// Releasing a lock that is not held is not an error
    fn unlock_upload(&self, id: &str) -> TusResult<()>;
}

/// Hook invoked once all declared bytes have been written
pub trait FinisherDataStore: Send + Sync {
    fn finish_upload(&self, id: &str) -> TusResult<()>;
}

/// Combine finished partial uploads into a final upload
pub trait ConcaterDataStore: Send + Sync {
    fn concat_uploads(&self, dest: &str, partial_uploads: &[UploadId]) -> TusResult<()>;
}

/// Which optional capabilities a data store provides.
///
/// Computed once when the server is assembled; a store is never re-probed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub terminater: bool,
    pub reader: bool,
    pub locker: bool,
    pub finisher: bool,
    pub concater: bool,
}

impl Capabilities {
    pub fn probe(store: &dyn DataStore) -> Self {
        Self {
            terminater: store.as_terminater().is_some(),
            reader: store.as_reader().is_some(),
            locker: store.as_locker().is_some(),
            finisher: store.as_finisher().is_some(),
            concater: store.as_concater().is_some(),
        }
    }

    /// Protocol extensions advertised for these capabilities
    pub fn extensions(&self) -> Vec<&'static str> {
        let mut extensions = vec!["creation"];
        if self.terminater {
            extensions.push("termination");
        }
        if self.concater {
            extensions.push("concatenation");
        }
        extensions
    }
}

/// Generate a fresh upload id
pub fn new_upload_id() -> UploadId {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_store::{MemoryStore, StoreFeatures};

    #[test]
    fn test_probe_bare_store() {
        let store = MemoryStore::with_features(StoreFeatures::none());
        let caps = Capabilities::probe(&store);
        assert_eq!(caps, Capabilities::default());
        assert_eq!(caps.extensions(), vec!["creation"]);
    }

    #[test]
    fn test_probe_full_store() {
        let store = MemoryStore::new();
        let caps = Capabilities::probe(&store);
        assert!(caps.terminater);
        assert!(caps.reader);
        assert!(caps.finisher);
        assert!(caps.concater);
        // Memory store never locks on its own
        assert!(!caps.locker);
        assert_eq!(caps.extensions(), vec!["creation", "termination", "concatenation"]);
    }

    #[test]
    fn test_upload_ids_are_unique() {
        let a = new_upload_id();
        let b = new_upload_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_file_info_completion() {
        let mut info = FileInfo::new(10);
        assert!(!info.is_complete());
        info.offset = 10;
        assert!(info.is_complete());
    }
}
