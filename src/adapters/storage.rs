//! Key-value storage adapters.
//!
//! Implement [`StoragePort`] for the sequence number and any other small
//! state that must survive a restart.
//!
//! - [`FileStorage`]: a JSON map on disk.  Every write replaces the file
//!   atomically (temp file + rename), so a power cut leaves either the old
//!   or the new contents.
//! - [`MemoryStorage`]: volatile, for tests and dry runs.
//!
//! Keys are namespaced as `namespace::key`.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::{StorageError, StoragePort};

fn composite_key(namespace: &str, key: &str) -> String {
    format!("{}::{}", namespace, key)
}

fn copy_out(data: &[u8], buf: &mut [u8]) -> Result<usize, StorageError> {
    if data.len() > buf.len() {
        return Err(StorageError::BufferTooSmall);
    }
    buf[..data.len()].copy_from_slice(data);
    Ok(data.len())
}

// ───────────────────────────────────────────────────────────────
// In-memory
// ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStorage {
    store: HashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoragePort for MemoryStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.store.get(&composite_key(namespace, key)) {
            Some(data) => copy_out(data, buf),
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.store
            .insert(composite_key(namespace, key), data.to_vec());
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// JSON file
// ───────────────────────────────────────────────────────────────

pub struct FileStorage {
    path: PathBuf,
    store: BTreeMap<String, Vec<u8>>,
}

impl FileStorage {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let store = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                warn!("FileStorage: {} is not a valid store: {}", path.display(), e);
                StorageError::Corrupted
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("FileStorage: {} not found, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                warn!("FileStorage: cannot read {}: {}", path.display(), e);
                return Err(StorageError::IoError);
            }
        };
        Ok(Self { path, store })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(&self.store).map_err(|_| StorageError::IoError)?;
        write_atomically(&self.path, &json).map_err(|e| {
            warn!("FileStorage: write to {} failed: {}", self.path.display(), e);
            StorageError::IoError
        })
    }
}

/// Write `data` next to `path` and rename it into place.
pub(crate) fn write_atomically(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)
}

impl StoragePort for FileStorage {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        match self.store.get(&composite_key(namespace, key)) {
            Some(data) => copy_out(data, buf),
            None => Err(StorageError::NotFound),
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let composite = composite_key(namespace, key);
        let previous = self.store.insert(composite.clone(), data.to_vec());
        if let Err(e) = self.persist() {
            // Keep memory consistent with disk.
            match previous {
                Some(old) => self.store.insert(composite, old),
                None => self.store.remove(&composite),
            };
            return Err(e);
        }
        Ok(())
    }
}
