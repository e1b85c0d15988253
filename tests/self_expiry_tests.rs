use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::time::{Duration, sleep};

use liveset::{
    Entity, EntityCore, EntityRecord, EntityRegistry, FactoryContext, MemoryStore, RegistryPolicy,
    factory_fn, now_epoch_ms,
};

struct TimerEntity {
    core: EntityCore,
    kill_count: Arc<AtomicUsize>,
}

#[async_trait]
impl Entity for TimerEntity {
    fn core(&self) -> &EntityCore {
        &self.core
    }

    fn to_record(&self) -> EntityRecord {
        self.core.base_record()
    }

    async fn on_kill(&self) {
        self.kill_count.fetch_add(1, Ordering::SeqCst);
    }
}

fn expiry_registry(kill_count: Arc<AtomicUsize>) -> EntityRegistry {
    let store = Arc::new(MemoryStore::new());
    let registry = EntityRegistry::with_policy(
        store,
        RegistryPolicy {
            expiry_recheck_ms: 50,
            ..RegistryPolicy::default()
        },
    );
    registry
        .register_factory(
            "timer",
            factory_fn(move |_context: FactoryContext, record: EntityRecord| {
                let kill_count = Arc::clone(&kill_count);
                async move {
                    let entity: Arc<dyn Entity> = Arc::new(TimerEntity {
                        core: EntityCore::from_record(&record),
                        kill_count,
                    });
                    Ok(entity)
                }
            }),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn scenario_d_past_kill_time_expires_on_next_check() {
    let kill_count = Arc::new(AtomicUsize::new(0));
    let registry = expiry_registry(Arc::clone(&kill_count));
    registry.start().await;

    registry
        .new_entity(EntityRecord::new("timer").with_kill_time(now_epoch_ms() - 1_000))
        .await
        .unwrap();

    sleep(Duration::from_millis(300)).await;
    assert_eq!(registry.live_count().await, 0);
    assert_eq!(kill_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn future_kill_time_waits_for_the_deadline() {
    let kill_count = Arc::new(AtomicUsize::new(0));
    let registry = expiry_registry(Arc::clone(&kill_count));
    registry.start().await;

    let entity = registry
        .new_entity(EntityRecord::new("timer").with_kill_time(now_epoch_ms() + 600))
        .await
        .unwrap();

    sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.live_count().await, 1);
    assert!(!entity.core().is_killed());

    sleep(Duration::from_millis(1_200)).await;
    assert_eq!(registry.live_count().await, 0);
    assert!(entity.core().is_killed());
    assert_eq!(kill_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_kill_time_never_expires() {
    let kill_count = Arc::new(AtomicUsize::new(0));
    let registry = expiry_registry(Arc::clone(&kill_count));
    registry.start().await;

    registry
        .new_entity(EntityRecord::new("timer"))
        .await
        .unwrap();

    sleep(Duration::from_millis(400)).await;
    assert_eq!(registry.live_count().await, 1);
    assert_eq!(kill_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn externally_killed_entity_skips_its_pending_check() {
    let kill_count = Arc::new(AtomicUsize::new(0));
    let registry = expiry_registry(Arc::clone(&kill_count));
    registry.start().await;

    let entity = registry
        .new_entity(EntityRecord::new("timer").with_kill_time(now_epoch_ms() + 300))
        .await
        .unwrap();

    registry.kill_entity("0").await;
    assert!(entity.core().is_killed());

    // The armed check observes the killed flag and must not fire the hook
    // a second time.
    sleep(Duration::from_millis(600)).await;
    assert_eq!(kill_count.load(Ordering::SeqCst), 1);
    assert_eq!(registry.live_count().await, 0);
}
