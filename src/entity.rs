//! Entity capability contract and shared lifecycle state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tokio::time::{Duration, sleep};

use crate::record::{EntityRecord, now_epoch_ms};
use crate::registry::RegistryHooks;

/// Capability contract every entity variant provides.
///
/// Entities are built exclusively by their type's registered factory and
/// owned by an [`EntityRegistry`](crate::registry::EntityRegistry). Variants
/// embed an [`EntityCore`] for identity and lifecycle state and add their own
/// behavior on top.
#[async_trait]
pub trait Entity: Send + Sync {
    /// Shared lifecycle state of this entity.
    fn core(&self) -> &EntityCore;

    /// Projects the entity into its persistable record.
    ///
    /// Feeding the result back through the entity's factory must reconstruct
    /// an equivalent entity. [`EntityCore::base_record`] fills the lifecycle
    /// fields; implementors add their type-specific payload.
    fn to_record(&self) -> EntityRecord;

    /// Hook invoked exactly once, after the entity has left the live map.
    ///
    /// Override point for releasing attached resources (timers,
    /// subscriptions, external handles).
    async fn on_kill(&self) {}
}

/// Shared lifecycle state embedded by every entity variant.
///
/// Cloning is shallow; clones observe the same identity, `killed` flag, and
/// hook bindings. The expiry watcher holds such a clone.
#[derive(Clone)]
pub struct EntityCore {
    state: Arc<CoreState>,
}

struct CoreState {
    entity_type: String,
    id: OnceLock<String>,
    create_time: i64,
    kill_time: i64,
    killed: AtomicBool,
    hooks: OnceLock<RegistryHooks>,
}

impl EntityCore {
    /// Builds lifecycle state from a record.
    ///
    /// `create_time` comes from the record when present (a reloaded entity)
    /// and from the current clock otherwise (a freshly created one).
    /// A missing `kill_time` means the entity never expires.
    pub fn from_record(record: &EntityRecord) -> Self {
        let id = OnceLock::new();
        if let Some(existing) = &record.id {
            let _ = id.set(existing.clone());
        }
        Self {
            state: Arc::new(CoreState {
                entity_type: record.entity_type.clone(),
                id,
                create_time: record.create_time.unwrap_or_else(now_epoch_ms),
                kill_time: record.kill_time.unwrap_or(0),
                killed: AtomicBool::new(false),
                hooks: OnceLock::new(),
            }),
        }
    }

    pub fn entity_type(&self) -> &str {
        &self.state.entity_type
    }

    /// Stable identity, once the registry has assigned one.
    pub fn id(&self) -> Option<&str> {
        self.state.id.get().map(String::as_str)
    }

    /// Creation time in epoch milliseconds.
    pub fn create_time(&self) -> i64 {
        self.state.create_time
    }

    /// Expiry time in epoch milliseconds; zero means never.
    pub fn kill_time(&self) -> i64 {
        self.state.kill_time
    }

    pub fn is_killed(&self) -> bool {
        self.state.killed.load(Ordering::SeqCst)
    }

    /// Requests removal through the owning registry.
    ///
    /// A no-op before the registry has bound its hooks and after the entity
    /// has been killed, so entity-internal callbacks may keep firing after
    /// logical death without special-casing.
    pub async fn kill(&self) {
        if self.is_killed() {
            return;
        }
        if let Some(hooks) = self.state.hooks.get() {
            hooks.kill().await;
        }
    }

    /// Reports a state change worth persisting. Same no-op rules as
    /// [`kill`](Self::kill).
    pub fn updated(&self) {
        if self.is_killed() {
            return;
        }
        if let Some(hooks) = self.state.hooks.get() {
            hooks.updated();
        }
    }

    /// Record projection of the lifecycle fields. Entity implementations
    /// start from this and add their type-specific payload.
    pub fn base_record(&self) -> EntityRecord {
        let mut record = EntityRecord::new(self.entity_type());
        record.id = self.id().map(str::to_string);
        record.create_time = Some(self.state.create_time);
        if self.state.kill_time != 0 {
            record.kill_time = Some(self.state.kill_time);
        }
        record
    }

    pub(crate) fn assign_id(&self, id: &str) {
        let _ = self.state.id.set(id.to_string());
    }

    pub(crate) fn bind_hooks(&self, hooks: RegistryHooks) {
        let _ = self.state.hooks.set(hooks);
    }

    pub(crate) fn mark_killed(&self) {
        self.state.killed.store(true, Ordering::SeqCst);
    }

    /// Starts the self-expiry watcher for entities with a non-zero
    /// `kill_time`.
    ///
    /// The watcher sleeps for exactly the remaining interval, then invokes
    /// the bound `kill()`. After a kill request it re-checks on a fixed
    /// interval until the `killed` flag is observed, which covers a kill
    /// that has not taken effect yet. A killed entity exits the watcher
    /// without rescheduling.
    pub(crate) fn arm_expiry(&self, recheck_interval_ms: u64) {
        if self.state.kill_time == 0 {
            return;
        }
        let core = self.clone();
        tokio::spawn(async move {
            loop {
                if core.is_killed() {
                    return;
                }
                let now = now_epoch_ms();
                if now >= core.kill_time() {
                    core.kill().await;
                    sleep(Duration::from_millis(recheck_interval_ms)).await;
                } else {
                    sleep(Duration::from_millis((core.kill_time() - now) as u64)).await;
                }
            }
        });
    }
}
