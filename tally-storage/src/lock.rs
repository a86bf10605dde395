//! Data-directory lock via advisory file locks. One process owns a
//! data directory; a second `tally` pointed at the same directory
//! fails fast instead of corrupting the store.

use std::fs::File;
use std::path::{Path, PathBuf};

use fd_lock::RwLock;
use tally_core::errors::StorageError;

pub struct DataDirLock {
    lock_file: RwLock<File>,
    lock_path: PathBuf,
}

impl DataDirLock {
    /// Create the lock file at `<data_dir>/tally.lock`.
    pub fn new(data_dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir).map_err(StorageError::sqlite)?;
        let lock_path = data_dir.join("tally.lock");
        let file = File::create(&lock_path).map_err(StorageError::sqlite)?;
        Ok(Self {
            lock_file: RwLock::new(file),
            lock_path,
        })
    }

    /// Acquire the exclusive lock (non-blocking). Hold the guard for
    /// the life of the process.
    pub fn acquire(&mut self) -> Result<fd_lock::RwLockWriteGuard<'_, File>, StorageError> {
        let path = self.lock_path.clone();
        self.lock_file
            .try_write()
            .map_err(|_| StorageError::DirLocked {
                path: path.display().to_string(),
            })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}
