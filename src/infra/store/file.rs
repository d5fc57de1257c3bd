//! File-backed snapshot store.

use std::fs::{self, create_dir_all, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::core::{AllocError, StateStore};

/// Stores the snapshot as a single JSON file.
///
/// Writes go to a sibling temporary file which is then renamed over the target, so
/// a crash mid-write leaves the previous snapshot intact.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Create a store for `path`, creating its parent directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AllocError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir_all(parent).map_err(|e| AllocError::Storage(e.to_string()))?;
        }
        Ok(Self { path })
    }

    /// Target file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for FileStateStore {
    fn write(&self, bytes: &[u8]) -> Result<(), AllocError> {
        let temp = self.temp_path();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp)
            .map_err(|e| AllocError::Storage(e.to_string()))?;
        file.write_all(bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| AllocError::Storage(e.to_string()))?;
        fs::rename(&temp, &self.path).map_err(|e| AllocError::Storage(e.to_string()))
    }

    fn read(&self) -> Result<Option<Vec<u8>>, AllocError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AllocError::Storage(e.to_string())),
        }
    }
}
