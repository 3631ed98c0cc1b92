//! Data store decorator with a limited total size.
//!
//! `LimitedStore` wraps another data store and keeps track of the declared
//! size of every upload it created. When a new upload would push the total
//! past the configured capacity, existing uploads are terminated, biggest
//! first, until the new upload fits.
//!
//! The policy is best effort. If terminating every tracked upload still does
//! not free enough space, the new upload is created anyway and the store
//! ends up above its capacity. Uploads are terminated whether they are
//! finished or still being written to.
//!
//! The bookkeeping lives in memory only. It starts empty on every process
//! start and is never reconciled with the wrapped store, so it drifts if
//! uploads are created or removed behind this decorator's back (a second
//! store on the same directory, for example) or after a restart.
//!
//! Reading, locking, finishing and concatenation are always advertised and
//! forwarded to the wrapped store when it provides them. Otherwise reading
//! and concatenation fail with `TusError::NotImplemented` while locking and
//! finishing succeed without doing anything.

use crate::error::{TusError, TusResult};
use crate::storage::{
    ConcaterDataStore, DataStore, FileInfo, FinisherDataStore, GetReaderDataStore,
    LockerDataStore, TerminaterDataStore, UploadId,
};
use log::{debug, error, info};
use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Size accounting for all uploads created through the decorator
#[derive(Debug, Default)]
struct Bookkeeping {
    uploads: HashMap<UploadId, u64>,
    used_size: u64,
}

impl Bookkeeping {
    fn fits(&self, size: u64, capacity: u64) -> bool {
        self.used_size.saturating_add(size) <= capacity
    }
}

pub struct LimitedStore {
    store_size: u64,
    store: Arc<dyn DataStore>,
    // A single lock covers the whole create-or-evict and terminate sequences,
    // including the wrapped store's calls.
    bookkeeping: Mutex<Bookkeeping>,
}

impl LimitedStore {
    /// Wrap `store`, limiting the sum of declared upload sizes to `store_size` bytes.
    ///
    /// The wrapped store must be able to terminate uploads.
    pub fn new(store_size: u64, store: Arc<dyn DataStore>) -> TusResult<Self> {
        if store.as_terminater().is_none() {
            return Err(TusError::CapabilityRequired("termination"));
        }

        info!("Limiting upload storage to {} bytes", store_size);
        Ok(Self {
            store_size,
            store,
            bookkeeping: Mutex::new(Bookkeeping::default()),
        })
    }

    pub fn store_size(&self) -> u64 {
        self.store_size
    }

    /// Sum of the declared sizes of all tracked uploads
    pub fn used_size(&self) -> u64 {
        self.bookkeeping().used_size
    }

    pub fn tracked_count(&self) -> usize {
        self.bookkeeping().uploads.len()
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.bookkeeping().uploads.contains_key(id)
    }

    fn bookkeeping(&self) -> MutexGuard<'_, Bookkeeping> {
        self.bookkeeping.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn terminater(&self) -> TusResult<&dyn TerminaterDataStore> {
        self.store
            .as_terminater()
            .ok_or(TusError::CapabilityRequired("termination"))
    }

    fn terminate_tracked(&self, books: &mut Bookkeeping, id: &str) -> TusResult<()> {
        self.terminater()?.terminate(id)?;

        let size = books.uploads.remove(id).unwrap_or(0);
        books.used_size -= size;
        Ok(())
    }

    /// Terminate uploads, biggest first, until `size` more bytes fit.
    ///
    /// Returns Ok even if everything was terminated and `size` still does
    /// not fit. A failing termination aborts the loop; uploads terminated
    /// before it stay terminated.
    fn ensure_space(&self, books: &mut Bookkeeping, size: u64) -> TusResult<()> {
        if books.fits(size, self.store_size) {
            return Ok(());
        }

        let mut sorted_uploads: Vec<(UploadId, u64)> = books
            .uploads
            .iter()
            .map(|(id, size)| (id.clone(), *size))
            .collect();
        sorted_uploads.sort_by(|a, b| b.1.cmp(&a.1));

        for (id, upload_size) in sorted_uploads {
            if let Err(e) = self.terminate_tracked(books, &id) {
                error!("Failed to evict upload {}: {}", id, e);
                return Err(e);
            }
            info!(
                "Evicted upload {} ({} bytes), {} of {} bytes in use",
                id, upload_size, books.used_size, self.store_size
            );

            if books.fits(size, self.store_size) {
                return Ok(());
            }
        }

        debug!(
            "Evicted every tracked upload, {} bytes still exceed the limit of {}",
            books.used_size.saturating_add(size),
            self.store_size
        );
        Ok(())
    }
}

impl DataStore for LimitedStore {
    fn new_upload(&self, info: FileInfo) -> TusResult<UploadId> {
        let mut books = self.bookkeeping();
        let size = info.size;

        self.ensure_space(&mut books, size)?;

        let id = self.store.new_upload(info)?;
        books.used_size += size;
        books.uploads.insert(id.clone(), size);

        debug!("Tracking upload {} ({} bytes), {} bytes in use", id, size, books.used_size);
        Ok(id)
    }

    fn write_chunk(&self, id: &str, offset: u64, src: &[u8]) -> TusResult<u64> {
        self.store.write_chunk(id, offset, src)
    }

    fn get_info(&self, id: &str) -> TusResult<FileInfo> {
        self.store.get_info(id)
    }

    fn as_terminater(&self) -> Option<&dyn TerminaterDataStore> {
        Some(self)
    }

    fn as_reader(&self) -> Option<&dyn GetReaderDataStore> {
        Some(self)
    }

    fn as_locker(&self) -> Option<&dyn LockerDataStore> {
        Some(self)
    }

    fn as_finisher(&self) -> Option<&dyn FinisherDataStore> {
        Some(self)
    }

    fn as_concater(&self) -> Option<&dyn ConcaterDataStore> {
        Some(self)
    }
}

impl TerminaterDataStore for LimitedStore {
    fn terminate(&self, id: &str) -> TusResult<()> {
        let mut books = self.bookkeeping();
        self.terminate_tracked(&mut books, id)
    }
}

impl GetReaderDataStore for LimitedStore {
    fn get_reader(&self, id: &str) -> TusResult<Box<dyn Read + Send>> {
        match self.store.as_reader() {
            Some(reader) => reader.get_reader(id),
            None => Err(TusError::NotImplemented),
        }
    }
}

impl LockerDataStore for LimitedStore {
    fn lock_upload(&self, id: &str) -> TusResult<()> {
        match self.store.as_locker() {
            Some(locker) => locker.lock_upload(id),
            None => Ok(()),
        }
    }

    fn unlock_upload(&self, id: &str) -> TusResult<()> {
        match self.store.as_locker() {
            Some(locker) => locker.unlock_upload(id),
            None => Ok(()),
        }
    }
}

impl FinisherDataStore for LimitedStore {
    fn finish_upload(&self, id: &str) -> TusResult<()> {
        match self.store.as_finisher() {
            Some(finisher) => finisher.finish_upload(id),
            None => Ok(()),
        }
    }
}

impl ConcaterDataStore for LimitedStore {
    fn concat_uploads(&self, dest: &str, partial_uploads: &[UploadId]) -> TusResult<()> {
        match self.store.as_concater() {
            Some(concater) => concater.concat_uploads(dest, partial_uploads),
            None => Err(TusError::NotImplemented),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory_locker::MemoryLocker;
    use crate::storage::memory_store::{MemoryStore, StoreFeatures};
    use std::collections::HashSet;
    use std::thread;

    /// Backend that hands out sequential ids and records terminations
    #[derive(Default)]
    struct RecordingStore {
        next_id: Mutex<u32>,
        terminated: Mutex<Vec<UploadId>>,
        fail_create: bool,
        fail_terminate: HashSet<UploadId>,
    }

    impl RecordingStore {
        fn terminated(&self) -> Vec<UploadId> {
            self.terminated.lock().unwrap().clone()
        }
    }

    impl DataStore for RecordingStore {
        fn new_upload(&self, _info: FileInfo) -> TusResult<UploadId> {
            if self.fail_create {
                return Err(TusError::Backend("create refused".to_string()));
            }
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            Ok(format!("upload{}", next))
        }

        fn write_chunk(&self, _id: &str, _offset: u64, src: &[u8]) -> TusResult<u64> {
            Ok(src.len() as u64)
        }

        fn get_info(&self, id: &str) -> TusResult<FileInfo> {
            Err(TusError::NotFound(id.to_string()))
        }

        fn as_terminater(&self) -> Option<&dyn TerminaterDataStore> {
            Some(self)
        }
    }

    impl TerminaterDataStore for RecordingStore {
        fn terminate(&self, id: &str) -> TusResult<()> {
            if self.fail_terminate.contains(id) {
                return Err(TusError::Backend(format!("cannot terminate {}", id)));
            }
            self.terminated.lock().unwrap().push(id.to_string());
            Ok(())
        }
    }

    fn create(store: &LimitedStore, size: u64) -> UploadId {
        store.new_upload(FileInfo::new(size)).unwrap()
    }

    #[test]
    fn test_requires_terminater() {
        let bare = Arc::new(MemoryStore::with_features(StoreFeatures::none()));
        assert!(matches!(
            LimitedStore::new(100, bare),
            Err(TusError::CapabilityRequired("termination"))
        ));
    }

    #[test]
    fn test_no_eviction_when_space_is_left() {
        let backend = Arc::new(RecordingStore::default());
        let store = LimitedStore::new(100, backend.clone()).unwrap();

        create(&store, 40);
        create(&store, 60);

        assert_eq!(store.used_size(), 100);
        assert_eq!(store.tracked_count(), 2);
        assert!(backend.terminated().is_empty());
    }

    #[test]
    fn test_evicts_biggest_uploads_first() {
        let backend = Arc::new(RecordingStore::default());
        let store = LimitedStore::new(95, backend.clone()).unwrap();

        let id10 = create(&store, 10);
        let id50 = create(&store, 50);
        let id30 = create(&store, 30);
        let id5 = create(&store, 5);
        assert_eq!(store.used_size(), 95);

        // 95 + 35 > 95: dropping 50 leaves 45 + 35 = 80 which fits.
        let new_id = create(&store, 35);

        assert_eq!(backend.terminated(), vec![id50.clone()]);
        assert_eq!(store.used_size(), 80);
        assert!(store.is_tracked(&new_id));
        assert!(store.is_tracked(&id10));
        assert!(store.is_tracked(&id30));
        assert!(store.is_tracked(&id5));
    }

    #[test]
    fn test_eviction_continues_in_descending_order() {
        let backend = Arc::new(RecordingStore::default());
        let store = LimitedStore::new(95, backend.clone()).unwrap();

        let id10 = create(&store, 10);
        let id50 = create(&store, 50);
        let id30 = create(&store, 30);
        let id5 = create(&store, 5);

        // 95 + 70 > 95, evict 50 -> 45 + 70 > 95, evict 30 -> 15 + 70 fits.
        let new_id = create(&store, 70);

        assert_eq!(backend.terminated(), vec![id50, id30]);
        assert_eq!(store.used_size(), 10 + 5 + 70);
        assert!(store.is_tracked(&id10));
        assert!(store.is_tracked(&id5));
        assert!(store.is_tracked(&new_id));
    }

    #[test]
    fn test_eviction_stops_as_soon_as_request_fits() {
        let backend = Arc::new(RecordingStore::default());
        let store = LimitedStore::new(40, backend.clone()).unwrap();

        let id10 = create(&store, 10);
        let id30 = create(&store, 30);
        assert_eq!(store.used_size(), 40);

        // 40 + 35 > 40, evict 30 -> 10 + 35 > 40, evict 10 -> 0 + 35 fits.
        create(&store, 35);
        assert_eq!(backend.terminated(), vec![id30, id10]);
        assert_eq!(store.used_size(), 35);
    }

    #[test]
    fn test_creation_succeeds_when_nothing_can_be_evicted() {
        let backend = Arc::new(RecordingStore::default());
        let store = LimitedStore::new(5, backend.clone()).unwrap();

        let id = create(&store, 100);

        assert!(store.is_tracked(&id));
        assert_eq!(store.used_size(), 100);
        assert!(backend.terminated().is_empty());
    }

    #[test]
    fn test_creation_succeeds_after_evicting_everything() {
        let backend = Arc::new(RecordingStore::default());
        let store = LimitedStore::new(50, backend.clone()).unwrap();

        let a = create(&store, 20);
        let b = create(&store, 25);
        create(&store, 80);

        assert_eq!(backend.terminated(), vec![b, a]);
        assert_eq!(store.used_size(), 80);
        assert_eq!(store.tracked_count(), 1);
    }

    #[test]
    fn test_failed_eviction_aborts_creation() {
        let mut backend = RecordingStore::default();
        backend.fail_terminate.insert("upload2".to_string());
        let backend = Arc::new(backend);
        let store = LimitedStore::new(100, backend.clone()).unwrap();

        let big = create(&store, 60); // upload1
        let stuck = create(&store, 30); // upload2
        assert_eq!(stuck, "upload2");

        let result = store.new_upload(FileInfo::new(90));
        assert!(matches!(result, Err(TusError::Backend(_))));

        // The first eviction stays done, nothing else changed.
        assert_eq!(backend.terminated(), vec![big]);
        assert_eq!(store.used_size(), 30);
        assert!(store.is_tracked(&stuck));
        assert_eq!(store.tracked_count(), 1);
    }

    #[test]
    fn test_failed_creation_leaves_bookkeeping_untouched() {
        let backend = Arc::new(RecordingStore {
            fail_create: true,
            ..Default::default()
        });
        let store = LimitedStore::new(100, backend).unwrap();

        assert!(matches!(
            store.new_upload(FileInfo::new(10)),
            Err(TusError::Backend(_))
        ));
        assert_eq!(store.used_size(), 0);
        assert_eq!(store.tracked_count(), 0);
    }

    #[test]
    fn test_terminate_updates_bookkeeping() {
        let backend = Arc::new(RecordingStore::default());
        let store = LimitedStore::new(100, backend.clone()).unwrap();

        let a = create(&store, 10);
        let b = create(&store, 20);
        store.terminate(&a).unwrap();

        assert_eq!(store.used_size(), 20);
        assert!(!store.is_tracked(&a));
        assert!(store.is_tracked(&b));
    }

    #[test]
    fn test_terminate_untracked_upload_keeps_used_size() {
        let backend = Arc::new(RecordingStore::default());
        let store = LimitedStore::new(100, backend.clone()).unwrap();
        create(&store, 10);

        store.terminate("created-elsewhere").unwrap();

        assert_eq!(store.used_size(), 10);
        assert_eq!(backend.terminated(), vec!["created-elsewhere".to_string()]);
    }

    #[test]
    fn test_failed_terminate_keeps_bookkeeping() {
        let mut backend = RecordingStore::default();
        backend.fail_terminate.insert("upload1".to_string());
        let store = LimitedStore::new(100, Arc::new(backend)).unwrap();
        let id = create(&store, 10);

        assert!(store.terminate(&id).is_err());
        assert_eq!(store.used_size(), 10);
        assert!(store.is_tracked(&id));
    }

    #[test]
    fn test_pass_through_without_capabilities() {
        let backend = Arc::new(MemoryStore::with_features(StoreFeatures {
            terminate: true,
            read: false,
            finish: false,
            concat: false,
        }));
        let store = LimitedStore::new(100, backend).unwrap();
        let id = create(&store, 10);

        assert!(matches!(store.get_reader(&id), Err(TusError::NotImplemented)));
        assert!(matches!(
            store.concat_uploads(&id, &[]),
            Err(TusError::NotImplemented)
        ));
        // Locking and finishing degrade to no-ops
        store.lock_upload(&id).unwrap();
        store.lock_upload(&id).unwrap();
        store.unlock_upload(&id).unwrap();
        store.finish_upload(&id).unwrap();
    }

    #[test]
    fn test_pass_through_with_capabilities() {
        let memory = Arc::new(MemoryStore::new());
        let locked = Arc::new(MemoryLocker::new(memory.clone()));
        let store = LimitedStore::new(100, locked).unwrap();

        let id = create(&store, 5);
        store.write_chunk(&id, 0, b"hello").unwrap();

        let mut buf = String::new();
        store.get_reader(&id).unwrap().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello");

        store.lock_upload(&id).unwrap();
        assert!(matches!(store.lock_upload(&id), Err(TusError::FileLocked)));
        store.unlock_upload(&id).unwrap();

        store.finish_upload(&id).unwrap();
        assert!(memory.is_finished(&id));
    }

    #[test]
    fn test_concurrent_accounting() {
        let backend = Arc::new(MemoryStore::new());
        let store = Arc::new(LimitedStore::new(1_000, backend.clone()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for i in 0..25u64 {
                        let id = store.new_upload(FileInfo::new(1 + (t + i) % 40)).unwrap();
                        if i % 3 == 0 {
                            // Another thread may have evicted it already.
                            let _ = store.terminate(&id);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Bookkeeping matches the uploads that still exist in the backend.
        let books = store.bookkeeping();
        let sum: u64 = books.uploads.values().sum();
        assert_eq!(books.used_size, sum);
        assert_eq!(books.uploads.len(), backend.upload_count());
        for (id, size) in books.uploads.iter() {
            assert_eq!(backend.get_info(id).unwrap().size, *size);
        }
    }
}
