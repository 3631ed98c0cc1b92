//! Local filesystem data store
//!
//! Every upload is kept as two files in the storage directory:
//! `<id>.bin` holds the received bytes and `<id>.info` the JSON encoded
//! `FileInfo`. The store can terminate, read and concatenate uploads; it
//! does not lock them, wrap it in a `MemoryLocker` for that.

use crate::config::StorageConfig;
use crate::error::{TusError, TusResult};
use crate::storage::{
    new_upload_id, ConcaterDataStore, DataStore, FileInfo, GetReaderDataStore,
    TerminaterDataStore, UploadId,
};
use log::{debug, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

fn prepare_storage_directory(path: &Path) -> io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        info!("Created storage directory: {}", path.display());
    }
    Ok(())
}

/// Local filesystem data store
pub struct LocalStore {
    storage_path: PathBuf,
    // Serializes info file updates
    write_lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(config: &StorageConfig) -> TusResult<Self> {
        Self::with_path(&config.directory)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> TusResult<Self> {
        let storage_path = path.into();
        prepare_storage_directory(&storage_path)?;
        info!("Using storage directory: {}", storage_path.display());

        Ok(Self {
            storage_path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    fn bin_path(&self, id: &str) -> PathBuf {
        self.storage_path.join(format!("{}.bin", id))
    }

    fn info_path(&self, id: &str) -> PathBuf {
        self.storage_path.join(format!("{}.info", id))
    }

    /// Ids come straight from request paths; anything that is not a plain
    /// token cannot name an upload of ours.
    fn check_id(id: &str) -> TusResult<()> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(TusError::NotFound(id.to_string()))
        }
    }

    fn read_info(&self, id: &str) -> TusResult<FileInfo> {
        Self::check_id(id)?;
        let content = match fs::read(self.info_path(id)) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TusError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    /// Readers never see a partially written info file: the content goes to
    /// a uniquely named sibling first and is renamed into place.
    fn write_info(&self, info: &FileInfo) -> TusResult<()> {
        let content = serde_json::to_vec(info)?;
        let tmp_path = self
            .storage_path
            .join(format!("{}.info.{}.tmp", info.id, new_upload_id()));
        if let Err(e) = fs::write(&tmp_path, content) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp_path, self.info_path(&info.id)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        Ok(())
    }

    fn open_bin_for_write(&self, id: &str) -> io::Result<File> {
        OpenOptions::new().write(true).open(self.bin_path(id))
    }
}

impl DataStore for LocalStore {
    fn new_upload(&self, mut info: FileInfo) -> TusResult<UploadId> {
        let id = new_upload_id();
        info.id = id.clone();
        info.offset = 0;

        File::create(self.bin_path(&id))?;
        self.write_info(&info)?;

        debug!("Created upload {} with size {} in {}", id, info.size, self.storage_path.display());
        Ok(id)
    }

    fn write_chunk(&self, id: &str, offset: u64, src: &[u8]) -> TusResult<u64> {
        let _lock = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut info = self.read_info(id)?;
        if offset != info.offset {
            return Err(TusError::MismatchOffset);
        }

        let remaining = info.size - info.offset;
        let take = (src.len() as u64).min(remaining) as usize;

        let mut file = self.open_bin_for_write(id)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&src[..take])?;
        file.flush()?;

        info.offset += take as u64;
        self.write_info(&info)?;

        debug!("Wrote {} bytes to upload {} at offset {}", take, id, offset);
        Ok(take as u64)
    }

    fn get_info(&self, id: &str) -> TusResult<FileInfo> {
        self.read_info(id)
    }

    fn as_terminater(&self) -> Option<&dyn TerminaterDataStore> {
        Some(self)
    }

    fn as_reader(&self) -> Option<&dyn GetReaderDataStore> {
        Some(self)
    }

    fn as_concater(&self) -> Option<&dyn ConcaterDataStore> {
        Some(self)
    }
}

impl TerminaterDataStore for LocalStore {
    fn terminate(&self, id: &str) -> TusResult<()> {
        Self::check_id(id)?;
        match fs::remove_file(self.info_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TusError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        if let Err(e) = fs::remove_file(self.bin_path(id)) {
            warn!("Upload {} had no data file to remove: {}", id, e);
        }

        info!("Terminated upload {}", id);
        Ok(())
    }
}

impl GetReaderDataStore for LocalStore {
    fn get_reader(&self, id: &str) -> TusResult<Box<dyn Read + Send>> {
        Self::check_id(id)?;
        match File::open(self.bin_path(id)) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(TusError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

impl ConcaterDataStore for LocalStore {
    fn concat_uploads(&self, dest: &str, partial_uploads: &[UploadId]) -> TusResult<()> {
        let _lock = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut info = self.read_info(dest)?;
        let mut file = self.open_bin_for_write(dest)?;
        file.set_len(0)?;

        let mut written = 0u64;
        for partial in partial_uploads {
            Self::check_id(partial)?;
            let mut src = match File::open(self.bin_path(partial)) {
                Ok(src) => src,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(TusError::NotFound(partial.clone()))
                }
                Err(e) => return Err(e.into()),
            };
            written += io::copy(&mut src, &mut file)?;
        }
        file.flush()?;

        info.offset = written;
        self.write_info(&info)?;

        info!("Concatenated {} uploads into {} ({} bytes)", partial_uploads.len(), dest, written);
        Ok(())
    }
}
