use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::{RegistryError, Result};
use crate::record::EntityRecord;
use crate::store::{DynamicStore, StoreListener};

/// JSON-file-backed record store.
///
/// The whole record sequence is kept in memory and rewritten as one pretty
/// JSON snapshot on every mutation. Writes go through a temp file followed
/// by a rename, so readers never observe a half-written snapshot.
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Vec<EntityRecord>>,
    listeners: Mutex<Vec<StoreListener>>,
    modify_count: AtomicU64,
}

impl JsonFileStore {
    /// Opens the store, loading an existing snapshot when present.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| {
                RegistryError::IoError(format!(
                    "Failed to read store file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            serde_json::from_slice(&bytes).map_err(|e| {
                RegistryError::SerializationError(format!(
                    "Failed to parse store file '{}': {}",
                    path.display(),
                    e
                ))
            })?
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
            listeners: Mutex::new(Vec::new()),
            modify_count: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of mutations applied (and snapshots written) so far.
    pub fn modify_count(&self) -> u64 {
        self.modify_count.load(Ordering::SeqCst)
    }

    fn write_snapshot(&self, records: &[EntityRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    RegistryError::IoError(format!("Failed to create store directory: {}", e))
                })?;
            }
        }

        let serialized = serde_json::to_vec_pretty(records).map_err(|e| {
            RegistryError::SerializationError(format!("Failed to serialize store snapshot: {}", e))
        })?;

        let temp_path = self.path.with_extension("tmp");
        let mut temp_file = File::create(&temp_path)
            .map_err(|e| RegistryError::IoError(format!("Failed to create temp file: {}", e)))?;
        temp_file
            .write_all(&serialized)
            .map_err(|e| RegistryError::IoError(format!("Failed to write snapshot: {}", e)))?;
        temp_file
            .sync_all()
            .map_err(|e| RegistryError::IoError(format!("Failed to sync snapshot: {}", e)))?;
        fs::rename(&temp_path, &self.path)
            .map_err(|e| RegistryError::IoError(format!("Failed to rename snapshot: {}", e)))?;
        Ok(())
    }
}

impl DynamicStore for JsonFileStore {
    fn data(&self) -> Vec<EntityRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn modify(&self, mutator: &mut dyn FnMut(&mut Vec<EntityRecord>)) -> Result<()> {
        let snapshot = {
            let mut records = self.records.lock()?;
            mutator(&mut records);
            records.clone()
        };
        self.write_snapshot(&snapshot)?;
        self.modify_count.fetch_add(1, Ordering::SeqCst);

        let listeners: Vec<StoreListener> = self.listeners.lock()?.clone();
        for listener in listeners {
            listener();
        }
        Ok(())
    }

    fn on_modify(&self, listener: StoreListener) {
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => poisoned.into_inner().push(listener),
        }
    }
}
