//! In-memory exclusive locks for uploads.
//!
//! Two requests writing to the same upload at once would corrupt its offset
//! and the order of its chunks, so handlers lock an upload before touching
//! its bytes. `MemoryLocker` keeps the set of locked upload ids in process
//! memory: locks are cheap, vanish when the process exits, and are not
//! shared between server instances.
//!
//! Acquisition never waits. Locking an upload that is already locked fails
//! with `TusError::FileLocked` and the client is expected to retry.

use crate::error::{TusError, TusResult};
use crate::storage::{
    ConcaterDataStore, DataStore, FileInfo, FinisherDataStore, GetReaderDataStore,
    LockerDataStore, TerminaterDataStore, UploadId,
};
use log::debug;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct MemoryLocker {
    store: Arc<dyn DataStore>,
    locks: Mutex<HashSet<UploadId>>,
}

impl MemoryLocker {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_locked(&self, id: &str) -> bool {
        self.locks().contains(id)
    }

    fn locks(&self) -> MutexGuard<'_, HashSet<UploadId>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DataStore for MemoryLocker {
    fn new_upload(&self, info: FileInfo) -> TusResult<UploadId> {
        self.store.new_upload(info)
    }

    fn write_chunk(&self, id: &str, offset: u64, src: &[u8]) -> TusResult<u64> {
        self.store.write_chunk(id, offset, src)
    }

    fn get_info(&self, id: &str) -> TusResult<FileInfo> {
        self.store.get_info(id)
    }

    fn as_terminater(&self) -> Option<&dyn TerminaterDataStore> {
        self.store.as_terminater()
    }

    fn as_reader(&self) -> Option<&dyn GetReaderDataStore> {
        self.store.as_reader()
    }

    fn as_locker(&self) -> Option<&dyn LockerDataStore> {
        Some(self)
    }

    fn as_finisher(&self) -> Option<&dyn FinisherDataStore> {
        self.store.as_finisher()
    }

    fn as_concater(&self) -> Option<&dyn ConcaterDataStore> {
        self.store.as_concater()
    }
}

impl LockerDataStore for MemoryLocker {
    fn lock_upload(&self, id: &str) -> TusResult<()> {
        // insert() is the check-and-set: false means someone holds it.
        if !self.locks().insert(id.to_string()) {
            debug!("Upload {} is already locked", id);
            return Err(TusError::FileLocked);
        }
        Ok(())
    }

    fn unlock_upload(&self, id: &str) -> TusResult<()> {
        self.locks().remove(id);
        Ok(())
    }
}
