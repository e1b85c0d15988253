//! Live entity set, construction/destruction, and store synchronization.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::time::{Duration, sleep};

use crate::core::{RegistryError, Result};
use crate::entity::Entity;
use crate::factory::{EntityFactory, FactoryContext, FactoryTable};
use crate::record::EntityRecord;
use crate::store::DynamicStore;

/// Tunables for flush debouncing and self-expiry rechecks.
#[derive(Debug, Clone)]
pub struct RegistryPolicy {
    /// Delay before a pending flush is written out. Mutations landing inside
    /// the window collapse into a single store write.
    pub flush_debounce_ms: u64,
    /// Follow-up interval for an expiry check whose kill request has not
    /// taken effect yet.
    pub expiry_recheck_ms: u64,
}

impl Default for RegistryPolicy {
    fn default() -> Self {
        Self {
            flush_debounce_ms: 25,
            expiry_recheck_ms: 1_000,
        }
    }
}

/// Counter snapshot of the registry's current state.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub started: bool,
    pub live_entities: usize,
    pub registered_types: usize,
    pub flush_pending: bool,
}

/// Owner-bound callbacks injected into an entity when it enters the live
/// map.
///
/// `kill` routes to the registry's `kill_entity` for this entity's id;
/// `updated` routes to `mark_pending_flush`. The bindings hold a weak
/// reference, so an entity outliving its registry degrades to no-ops.
#[derive(Clone)]
pub struct RegistryHooks {
    shared: Weak<RegistryShared>,
    id: String,
}

impl RegistryHooks {
    pub(crate) async fn kill(&self) {
        if let Some(shared) = self.shared.upgrade() {
            EntityRegistry { shared }.kill_entity(&self.id).await;
        }
    }

    pub(crate) fn updated(&self) {
        if let Some(shared) = self.shared.upgrade() {
            EntityRegistry { shared }.mark_pending_flush();
        }
    }
}

struct RegistryShared {
    store: Arc<dyn DynamicStore>,
    policy: RegistryPolicy,
    factories: std::sync::Mutex<FactoryTable>,
    state: Mutex<RegistryState>,
    /// Reentrancy guard: set while the registry writes the store, so the
    /// change notification for that write is recognized as self-originated.
    saving: AtomicBool,
    flush_pending: AtomicBool,
    flush_scheduled: AtomicBool,
}

#[derive(Default)]
struct RegistryState {
    started: bool,
    entities: HashMap<String, Arc<dyn Entity>>,
}

/// Registry owning the live entity set.
///
/// Entities are reconstructed from the store's record sequence, written back
/// debounced, and removed through a single idempotent kill path. Clones
/// share the same underlying registry.
#[derive(Clone)]
pub struct EntityRegistry {
    shared: Arc<RegistryShared>,
}

impl EntityRegistry {
    pub fn new(store: Arc<dyn DynamicStore>) -> Self {
        Self::with_policy(store, RegistryPolicy::default())
    }

    pub fn with_policy(store: Arc<dyn DynamicStore>, policy: RegistryPolicy) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                store,
                policy,
                factories: std::sync::Mutex::new(FactoryTable::default()),
                state: Mutex::new(RegistryState::default()),
                saving: AtomicBool::new(false),
                flush_pending: AtomicBool::new(false),
                flush_scheduled: AtomicBool::new(false),
            }),
        }
    }

    /// Registers the factory for an entity type, replacing any previous one.
    pub fn register_factory(
        &self,
        entity_type: impl Into<String>,
        factory: EntityFactory,
    ) -> Result<()> {
        let entity_type = entity_type.into();
        debug!("Registered entity factory for type '{}'", entity_type);
        let mut factories = self.shared.factories.lock()?;
        factories.insert(entity_type, factory);
        Ok(())
    }

    /// Transitions the registry to started and performs the initial load
    /// from the store. Idempotent: a second call is a no-op.
    ///
    /// Until this is called, every other operation no-ops or rejects, so
    /// callers issued before readiness degrade gracefully.
    pub async fn start(&self) {
        {
            let mut state = self.shared.state.lock().await;
            if state.started {
                return;
            }
            state.started = true;
        }
        info!("Entity registry started");

        let weak = Arc::downgrade(&self.shared);
        self.shared.store.on_modify(Arc::new(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            // Writes the registry itself originated must not reload the
            // live set: reconstruction would destroy entity identity and
            // any in-flight attached state on every single mutation.
            if shared.saving.load(Ordering::SeqCst) {
                return;
            }
            let registry = EntityRegistry { shared };
            tokio::spawn(async move {
                registry.reset_entities().await;
            });
        }));

        self.reset_entities().await;
    }

    /// Constructs an entity from a record and inserts it into the live map.
    ///
    /// Rejects with [`RegistryError::NotStarted`] before `start()`. An
    /// unknown type or a failing factory is logged and rejected without
    /// panicking; batch callers drop the record and continue. A live entity
    /// already holding the same id is killed first (last write wins).
    pub async fn new_entity(&self, record: EntityRecord) -> Result<Arc<dyn Entity>> {
        if !self.is_started().await {
            return Err(RegistryError::NotStarted);
        }

        let factory = {
            let factories = self.shared.factories.lock()?;
            factories.get(&record.entity_type)
        };
        let Some(factory) = factory else {
            warn!(
                "No factory for entity type '{}', dropping record",
                record.entity_type
            );
            return Err(RegistryError::UnknownEntityType(record.entity_type));
        };

        let entity_type = record.entity_type.clone();
        let context = FactoryContext::new(self.clone());
        let entity = match factory(context, record).await {
            Ok(entity) => entity,
            Err(err) => {
                warn!(
                    "Factory for entity type '{}' failed ({}), dropping record",
                    entity_type, err
                );
                return Err(err);
            }
        };

        let mut state = self.shared.state.lock().await;
        let id = match entity.core().id() {
            Some(id) => id.to_string(),
            None => {
                let id = lowest_unused_id(&state.entities);
                entity.core().assign_id(&id);
                id
            }
        };
        if let Some(previous) = state.entities.remove(&id) {
            debug!("Replacing live entity '{}'", id);
            previous.core().mark_killed();
            previous.on_kill().await;
        }
        entity.core().bind_hooks(RegistryHooks {
            shared: Arc::downgrade(&self.shared),
            id: id.clone(),
        });
        state.entities.insert(id.clone(), Arc::clone(&entity));
        drop(state);

        debug!("Entity '{}' of type '{}' is live", id, entity_type);
        entity.core().arm_expiry(self.shared.policy.expiry_recheck_ms);
        self.mark_pending_flush();
        Ok(entity)
    }

    /// Removes an entity from the live map and runs its kill steps.
    /// Idempotent: unknown ids are a no-op.
    pub async fn kill_entity(&self, id: &str) {
        let removed = {
            let mut state = self.shared.state.lock().await;
            state.entities.remove(id)
        };
        let Some(entity) = removed else {
            return;
        };
        debug!("Killed entity '{}'", id);
        entity.core().mark_killed();
        entity.on_kill().await;
        self.mark_pending_flush();
    }

    /// Kills every live entity, then marks one pending flush.
    pub async fn kill_all_entities(&self) {
        let drained: Vec<(String, Arc<dyn Entity>)> = {
            let mut state = self.shared.state.lock().await;
            state.entities.drain().collect()
        };
        for (id, entity) in drained {
            debug!("Killed entity '{}'", id);
            entity.core().mark_killed();
            entity.on_kill().await;
        }
        self.mark_pending_flush();
    }

    /// Reconciles the live set against the store's current snapshot.
    ///
    /// Kills every live entity, then issues one construction per record in
    /// snapshot order. Constructions run concurrently and may complete out
    /// of order; records whose factory is missing or failing are dropped
    /// while the rest of the batch proceeds. No-op before `start()`.
    pub async fn reset_entities(&self) {
        if !self.is_started().await {
            return;
        }
        debug!("Reconciling live entities against store snapshot");
        self.kill_all_entities().await;

        let snapshot = self.shared.store.data();
        let mut constructions = Vec::with_capacity(snapshot.len());
        for record in snapshot {
            let registry = self.clone();
            // Failures are logged inside new_entity; the batch continues.
            constructions.push(tokio::spawn(async move {
                let _ = registry.new_entity(record).await;
            }));
        }
        for construction in constructions {
            let _ = construction.await;
        }
    }

    /// Marks the live set dirty and schedules at most one deferred flush.
    ///
    /// Any number of kills and creates landing before the flush runs
    /// collapse into a single store write.
    pub fn mark_pending_flush(&self) {
        self.shared.flush_pending.store(true, Ordering::SeqCst);
        if self.shared.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            sleep(Duration::from_millis(shared.policy.flush_debounce_ms)).await;
            shared.flush_scheduled.store(false, Ordering::SeqCst);
            if shared.flush_pending.swap(false, Ordering::SeqCst) {
                let registry = EntityRegistry { shared };
                if let Err(err) = registry.save_to_dynamic_data().await {
                    warn!("Deferred flush failed: {}", err);
                }
            }
        });
    }

    /// Replaces the store snapshot with the serialized form of every live
    /// entity. No-op before `start()`.
    ///
    /// The write happens under the reentrancy guard so the store's change
    /// notification for it is recognized as self-originated.
    pub async fn save_to_dynamic_data(&self) -> Result<()> {
        let records: Vec<EntityRecord> = {
            let state = self.shared.state.lock().await;
            if !state.started {
                return Ok(());
            }
            state.entities.values().map(|e| e.to_record()).collect()
        };
        debug!("Persisting {} live entities", records.len());

        self.shared.saving.store(true, Ordering::SeqCst);
        let result = self.shared.store.modify(&mut |data| {
            *data = records.clone();
        });
        self.shared.saving.store(false, Ordering::SeqCst);
        result
    }

    pub async fn is_started(&self) -> bool {
        self.shared.state.lock().await.started
    }

    /// Number of live entities.
    pub async fn live_count(&self) -> usize {
        self.shared.state.lock().await.entities.len()
    }

    /// Looks up a live entity by id.
    pub async fn entity(&self, id: &str) -> Option<Arc<dyn Entity>> {
        self.shared.state.lock().await.entities.get(id).cloned()
    }

    /// Ids of all live entities, in no particular order.
    pub async fn entity_ids(&self) -> Vec<String> {
        self.shared
            .state
            .lock()
            .await
            .entities
            .keys()
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> RegistryStats {
        let (started, live_entities) = {
            let state = self.shared.state.lock().await;
            (state.started, state.entities.len())
        };
        let registered_types = match self.shared.factories.lock() {
            Ok(factories) => factories.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        RegistryStats {
            started,
            live_entities,
            registered_types,
            flush_pending: self.shared.flush_pending.load(Ordering::SeqCst),
        }
    }

    pub fn policy(&self) -> &RegistryPolicy {
        &self.shared.policy
    }
}

/// Lowest numeric-string id not currently live: "0", "1", ...
fn lowest_unused_id(entities: &HashMap<String, Arc<dyn Entity>>) -> String {
    let mut candidate = 0usize;
    loop {
        let id = candidate.to_string();
        if !entities.contains_key(&id) {
            return id;
        }
        candidate += 1;
    }
}
