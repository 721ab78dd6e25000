#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fieldops_materials::{
    cache::{InMemoryCache, LocalMaterialCache},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    repositories::InMemoryMaterialRepository,
    services::StockStore,
    Material, UsageType,
};

pub const TEST_KEY: &str = "materials";

/// A store wired to in-process backends, with handles to both kept for
/// assertions and fault injection.
pub struct Harness {
    pub store: StockStore,
    pub remote: Arc<InMemoryMaterialRepository>,
    pub cache: Arc<InMemoryCache>,
}

impl Harness {
    pub fn new(remote: InMemoryMaterialRepository) -> Self {
        Self::with_cache(remote, InMemoryCache::new())
    }

    pub fn with_cache(remote: InMemoryMaterialRepository, cache: InMemoryCache) -> Self {
        let remote = Arc::new(remote);
        let cache = Arc::new(cache);
        let local = LocalMaterialCache::new(cache.clone(), TEST_KEY);
        // A high threshold keeps the breaker closed so each test controls
        // failures through the repository alone.
        let breaker = CircuitBreaker::with_config(CircuitBreakerConfig {
            failure_threshold: 1_000,
            reset_after: Duration::from_secs(30),
            trial_successes: 1,
        });
        let store = StockStore::new(remote.clone(), local, breaker);
        Self {
            store,
            remote,
            cache,
        }
    }

    /// Remote and local cache both hold `materials`; the store is loaded.
    pub async fn seeded(materials: Vec<Material>) -> Self {
        let harness = Self::new(InMemoryMaterialRepository::with_documents(
            materials.clone(),
        ));
        harness
            .local_cache()
            .write(&materials)
            .await
            .expect("seed local cache");
        harness.store.load().await;
        harness
    }

    pub fn local_cache(&self) -> LocalMaterialCache {
        LocalMaterialCache::new(self.cache.clone(), TEST_KEY)
    }

    pub fn stock_of(&self, id: &str) -> Option<u32> {
        self.store.get_material_by_id(id).map(|m| m.stock)
    }
}

pub fn material(id: &str, name: &str, stock: u32) -> Material {
    Material {
        id: id.to_string(),
        name: name.to_string(),
        category: "network".to_string(),
        usage_type: UsageType::Consumable,
        unit: "m".to_string(),
        stock,
        min_stock: 0,
        is_local: false,
    }
}

/// Waits until the store's snapshot satisfies `predicate`, or panics.
pub async fn wait_for<F>(store: &StockStore, predicate: F)
where
    F: Fn(&[Material]) -> bool,
{
    let mut rx = store.changes();
    let outcome = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if predicate(&rx.borrow_and_update()) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await;
    assert!(outcome.is_ok(), "timed out waiting for store state");
}
