//! Persistent backing stores for the offline queue
//!
//! A store holds the whole backlog as one snapshot. The queue serializes
//! every read-modify-write, so stores only need to make a single `save`
//! atomic with respect to crashes.

use super::OfflineLogEntry;
use crate::error::{Result, ShipError};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Durable snapshot storage
pub trait OfflineStore: Send + Sync {
    /// Read the persisted backlog (empty if nothing was saved yet)
    fn load(&self) -> Result<Vec<OfflineLogEntry>>;

    /// Replace the persisted backlog with `records`
    fn save(&self, records: &[OfflineLogEntry]) -> Result<()>;
}

/// JSON file store.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store at `path`, creating parent directories as needed
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| ShipError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }
        Ok(Self { path })
    }

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

impl OfflineStore for FileStore {
    fn load(&self) -> Result<Vec<OfflineLogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read(&self.path).map_err(|e| ShipError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        if content.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&content)?)
    }

    fn save(&self, records: &[OfflineLogEntry]) -> Result<()> {
        let tmp = self.temp_path();
        let content = serde_json::to_vec(records)?;
        fs::write(&tmp, content).map_err(|e| ShipError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &self.path).map_err(|e| ShipError::Io {
            path: self.path.clone(),
            source: e,
        })
    }
}

/// In-memory store; clones share the same backlog.
///
/// Survives re-creating the queue, not the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<Vec<OfflineLogEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl OfflineStore for MemoryStore {
    fn load(&self) -> Result<Vec<OfflineLogEntry>> {
        Ok(self.records.lock().clone())
    }

    fn save(&self, records: &[OfflineLogEntry]) -> Result<()> {
        *self.records.lock() = records.to_vec();
        Ok(())
    }
}
