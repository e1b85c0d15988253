//! Type-discriminator-keyed entity construction.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::core::Result;
use crate::entity::Entity;
use crate::record::EntityRecord;
use crate::registry::EntityRegistry;

/// Asynchronous constructor producing an entity from an untyped record.
///
/// One factory is registered per `type` discriminator. Construction may
/// await external I/O and may fail; the registry logs failures and drops the
/// offending record without aborting the surrounding batch.
pub type EntityFactory = Arc<
    dyn Fn(FactoryContext, EntityRecord) -> BoxFuture<'static, Result<Arc<dyn Entity>>>
        + Send
        + Sync,
>;

/// Capabilities handed to a factory while it builds an entity.
#[derive(Clone)]
pub struct FactoryContext {
    registry: EntityRegistry,
}

impl FactoryContext {
    pub(crate) fn new(registry: EntityRegistry) -> Self {
        Self { registry }
    }

    /// The registry that will own the entity under construction.
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }
}

/// Wraps a plain `async fn` constructor into an [`EntityFactory`].
pub fn factory_fn<F, Fut>(constructor: F) -> EntityFactory
where
    F: Fn(FactoryContext, EntityRecord) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Arc<dyn Entity>>> + Send + 'static,
{
    Arc::new(move |context, record| Box::pin(constructor(context, record)))
}

/// Mapping from type discriminator to constructor.
#[derive(Default)]
pub(crate) struct FactoryTable {
    factories: HashMap<String, EntityFactory>,
}

impl FactoryTable {
    pub fn insert(&mut self, entity_type: impl Into<String>, factory: EntityFactory) {
        self.factories.insert(entity_type.into(), factory);
    }

    pub fn get(&self, entity_type: &str) -> Option<EntityFactory> {
        self.factories.get(entity_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }
}
