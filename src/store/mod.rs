//! Dynamic data store boundary.
//!
//! The store holds the canonical ordered sequence of entity records. The
//! registry is one writer among possibly many: command surfaces, migration
//! tools, or an operator editing the backing file all go through the same
//! `modify` entry point, and every mutation — the registry's own included —
//! notifies the registered listeners.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use crate::core::Result;
use crate::record::EntityRecord;

/// Callback invoked after every mutation of the record sequence.
///
/// Listeners are called synchronously from the mutating `modify` call, so
/// they must not block; the registry's listener only inspects a flag and
/// spawns reconciliation onto the ambient tokio runtime.
pub type StoreListener = Arc<dyn Fn() + Send + Sync>;

/// Canonical ordered sequence of entity records with change notifications.
pub trait DynamicStore: Send + Sync {
    /// Snapshot of the current record sequence.
    fn data(&self) -> Vec<EntityRecord>;

    /// Applies `mutator` to the record sequence, persists the result, and
    /// notifies listeners before returning.
    fn modify(&self, mutator: &mut dyn FnMut(&mut Vec<EntityRecord>)) -> Result<()>;

    /// Subscribes to mutation notifications from any source.
    fn on_modify(&self, listener: StoreListener);
}
