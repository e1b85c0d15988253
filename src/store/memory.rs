use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::Result;
use crate::record::EntityRecord;
use crate::store::{DynamicStore, StoreListener};

/// In-memory record store.
///
/// Backs tests and embedders that manage durability themselves. Mutations
/// are counted so callers can observe how many writes actually reached the
/// store.
pub struct MemoryStore {
    records: Mutex<Vec<EntityRecord>>,
    listeners: Mutex<Vec<StoreListener>>,
    modify_count: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    /// Creates a store pre-seeded with a record sequence.
    pub fn with_records(records: Vec<EntityRecord>) -> Self {
        Self {
            records: Mutex::new(records),
            listeners: Mutex::new(Vec::new()),
            modify_count: AtomicU64::new(0),
        }
    }

    /// Number of mutations applied so far.
    pub fn modify_count(&self) -> u64 {
        self.modify_count.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicStore for MemoryStore {
    fn data(&self) -> Vec<EntityRecord> {
        // A poisoned lock still holds the last consistent snapshot.
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn modify(&self, mutator: &mut dyn FnMut(&mut Vec<EntityRecord>)) -> Result<()> {
        {
            let mut records = self.records.lock()?;
            mutator(&mut records);
        }
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
