//! In-memory implementation of DataStore, used for the `memory` backend and tests

use crate::error::{TusError, TusResult};
use crate::storage::{
    new_upload_id, ConcaterDataStore, DataStore, FileInfo, FinisherDataStore, GetReaderDataStore,
    TerminaterDataStore, UploadId,
};
use log::{debug, info};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Optional capabilities a `MemoryStore` advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreFeatures {
    pub terminate: bool,
    pub read: bool,
    pub finish: bool,
    pub concat: bool,
}

impl StoreFeatures {
    pub fn all() -> Self {
        Self {
            terminate: true,
            read: true,
            finish: true,
            concat: true,
        }
    }

    /// Baseline only: create, write and status
    pub fn none() -> Self {
        Self {
            terminate: false,
            read: false,
            finish: false,
            concat: false,
        }
    }
}

impl Default for StoreFeatures {
    fn default() -> Self {
        Self::all()
    }
}

struct MemoryUpload {
    info: FileInfo,
    data: Vec<u8>,
    finished: bool,
}

/// In-memory data store
pub struct MemoryStore {
    // upload_id -> upload
    uploads: Arc<Mutex<HashMap<UploadId, MemoryUpload>>>,
    features: StoreFeatures,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_features(StoreFeatures::all())
    }

    pub fn with_features(features: StoreFeatures) -> Self {
        Self {
            uploads: Arc::new(Mutex::new(HashMap::new())),
            features,
        }
    }

    fn uploads(&self) -> MutexGuard<'_, HashMap<UploadId, MemoryUpload>> {
        self.uploads.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get the number of uploads in the store
    pub fn upload_count(&self) -> usize {
        self.uploads().len()
    }

    /// Check if an upload exists in the store
    pub fn upload_exists(&self, id: &str) -> bool {
        self.uploads().contains_key(id)
    }

    /// Whether the finish hook ran for an upload
    pub fn is_finished(&self, id: &str) -> bool {
        self.uploads().get(id).map(|u| u.finished).unwrap_or(false)
    }

    /// Clear all uploads from the store
    pub fn clear(&self) {
        self.uploads().clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for MemoryStore {
    fn new_upload(&self, mut info: FileInfo) -> TusResult<UploadId> {
        let id = new_upload_id();
        info.id = id.clone();
        info.offset = 0;

        debug!("Memory: Created upload {} with size {}", id, info.size);
        self.uploads().insert(
            id.clone(),
            MemoryUpload {
                info,
                data: Vec::new(),
                finished: false,
            },
        );
        Ok(id)
    }

    fn write_chunk(&self, id: &str, offset: u64, src: &[u8]) -> TusResult<u64> {
        let mut uploads = self.uploads();
        let upload = uploads
            .get_mut(id)
            .ok_or_else(|| TusError::NotFound(id.to_string()))?;

        if offset != upload.info.offset {
            return Err(TusError::MismatchOffset);
        }

        let remaining = upload.info.size - upload.info.offset;
        let take = (src.len() as u64).min(remaining) as usize;
        upload.data.extend_from_slice(&src[..take]);
        upload.info.offset += take as u64;

        debug!("Memory: Wrote {} bytes to upload {} at offset {}", take, id, offset);
        Ok(take as u64)
    }

    fn get_info(&self, id: &str) -> TusResult<FileInfo> {
        self.uploads()
            .get(id)
            .map(|u| u.info.clone())
            .ok_or_else(|| TusError::NotFound(id.to_string()))
    }

    fn as_terminater(&self) -> Option<&dyn TerminaterDataStore> {
        if self.features.terminate {
            Some(self)
        } else {
            None
        }
    }

    fn as_reader(&self) -> Option<&dyn GetReaderDataStore> {
        if self.features.read {
            Some(self)
        } else {
            None
        }
    }

    fn as_finisher(&self) -> Option<&dyn FinisherDataStore> {
        if self.features.finish {
            Some(self)
        } else {
            None
        }
    }

    fn as_concater(&self) -> Option<&dyn ConcaterDataStore> {
        if self.features.concat {
            Some(self)
        } else {
            None
        }
    }
}

impl TerminaterDataStore for MemoryStore {
    fn terminate(&self, id: &str) -> TusResult<()> {
        match self.uploads().remove(id) {
            Some(_) => {
                info!("Memory: Terminated upload {}", id);
                Ok(())
            }
            None => Err(TusError::NotFound(id.to_string())),
        }
    }
}

impl GetReaderDataStore for MemoryStore {
    fn get_reader(&self, id: &str) -> TusResult<Box<dyn Read + Send>> {
        let uploads = self.uploads();
        let upload = uploads
            .get(id)
            .ok_or_else(|| TusError::NotFound(id.to_string()))?;
        Ok(Box::new(Cursor::new(upload.data.clone())))
    }
}

impl FinisherDataStore for MemoryStore {
    fn finish_upload(&self, id: &str) -> TusResult<()> {
        let mut uploads = self.uploads();
        let upload = uploads
            .get_mut(id)
            .ok_or_else(|| TusError::NotFound(id.to_string()))?;
        upload.finished = true;
        Ok(())
    }
}

impl ConcaterDataStore for MemoryStore {
    fn concat_uploads(&self, dest: &str, partial_uploads: &[UploadId]) -> TusResult<()> {
        let mut uploads = self.uploads();

        let mut combined = Vec::new();
        for partial in partial_uploads {
            let upload = uploads
                .get(partial)
                .ok_or_else(|| TusError::NotFound(partial.clone()))?;
            combined.extend_from_slice(&upload.data);
        }

        let target = uploads
            .get_mut(dest)
            .ok_or_else(|| TusError::NotFound(dest.to_string()))?;
        target.info.offset = combined.len() as u64;
        target.data = combined;

        info!("Memory: Concatenated {} uploads into {}", partial_uploads.len(), dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(store: &MemoryStore, id: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        store.get_reader(id).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_memory_store_basic_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.upload_count(), 0);

        let id = store.new_upload(FileInfo::new(11)).unwrap();
        assert!(store.upload_exists(&id));

        assert_eq!(store.write_chunk(&id, 0, b"hello ").unwrap(), 6);
        assert_eq!(store.write_chunk(&id, 6, b"world").unwrap(), 5);

        let info = store.get_info(&id).unwrap();
        assert_eq!(info.id, id);
        assert_eq!(info.offset, 11);
        assert!(info.is_complete());
        assert_eq!(read_all(&store, &id), b"hello world");

        store.finish_upload(&id).unwrap();
        assert!(store.is_finished(&id));

        store.terminate(&id).unwrap();
        assert!(!store.upload_exists(&id));
    }

    #[test]
    fn test_memory_store_write_is_capped_at_declared_size() {
        let store = MemoryStore::new();
        let id = store.new_upload(FileInfo::new(4)).unwrap();
        assert_eq!(store.write_chunk(&id, 0, b"abcdefgh").unwrap(), 4);
        assert_eq!(read_all(&store, &id), b"abcd");
    }

    #[test]
    fn test_memory_store_error_cases() {
        let store = MemoryStore::new();
        assert!(matches!(store.get_info("missing"), Err(TusError::NotFound(_))));
        assert!(matches!(store.terminate("missing"), Err(TusError::NotFound(_))));
        assert!(store.get_reader("missing").is_err());

        let id = store.new_upload(FileInfo::new(10)).unwrap();
        assert!(matches!(store.write_chunk(&id, 3, b"x"), Err(TusError::MismatchOffset)));
    }

    #[test]
    fn test_memory_store_concat() {
        let store = MemoryStore::new();
        let a = store.new_upload(FileInfo::new(3)).unwrap();
        let b = store.new_upload(FileInfo::new(3)).unwrap();
        store.write_chunk(&a, 0, b"foo").unwrap();
        store.write_chunk(&b, 0, b"bar").unwrap();

        let mut final_info = FileInfo::new(6);
        final_info.is_final = true;
        let dest = store.new_upload(final_info).unwrap();
        store.concat_uploads(&dest, &[a, b]).unwrap();

        assert_eq!(read_all(&store, &dest), b"foobar");
        assert!(store.get_info(&dest).unwrap().is_complete());
    }

    #[test]
    fn test_memory_store_features_toggle_probes() {
        let store = MemoryStore::with_features(StoreFeatures {
            terminate: true,
            read: false,
            finish: false,
            concat: false,
        });
        assert!(store.as_terminater().is_some());
        assert!(store.as_reader().is_none());
        assert!(store.as_finisher().is_none());
        assert!(store.as_concater().is_none());
        assert!(store.as_locker().is_none());
    }
}
