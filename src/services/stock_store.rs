use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

use crate::{
    cache::LocalMaterialCache,
    catalog,
    circuit_breaker::CircuitBreaker,
    errors::ServiceError,
    events::{Event, EventSender, FallbackOperation},
    models::{merge_records, Material, MaterialPatch, MaterialRecord, NewMaterial},
    repositories::MaterialRepository,
};

pub type MaterialList = Arc<Vec<Material>>;

/// Current view of all materials, kept in step with the remote collection
/// and mirrored into the local cache.
///
/// The list is only ever replaced, never edited in place, so a snapshot held
/// by a reader stays internally consistent. Remote failures are logged and
/// compensated locally; apart from input validation in
/// [`add_material`](Self::add_material), no operation fails its caller.
#[derive(Clone)]
pub struct StockStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    state: watch::Sender<MaterialList>,
    // Serializes read-modify-replace of `state` together with the cache write.
    commit_lock: Mutex<()>,
    local: LocalMaterialCache,
    remote: Arc<dyn MaterialRepository>,
    breaker: CircuitBreaker,
    events: Option<EventSender>,
}

impl StockStore {
    pub fn new(
        remote: Arc<dyn MaterialRepository>,
        local: LocalMaterialCache,
        breaker: CircuitBreaker,
    ) -> Self {
        Self::build(remote, local, breaker, None)
    }

    pub fn with_events(
        remote: Arc<dyn MaterialRepository>,
        local: LocalMaterialCache,
        breaker: CircuitBreaker,
        events: EventSender,
    ) -> Self {
        Self::build(remote, local, breaker, Some(events))
    }

    fn build(
        remote: Arc<dyn MaterialRepository>,
        local: LocalMaterialCache,
        breaker: CircuitBreaker,
        events: Option<EventSender>,
    ) -> Self {
        let (state, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            inner: Arc::new(StoreInner {
                state,
                commit_lock: Mutex::new(()),
                local,
                remote,
                breaker,
                events,
            }),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> MaterialList {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every replacement of the snapshot.
    pub fn changes(&self) -> watch::Receiver<MaterialList> {
        self.inner.state.subscribe()
    }

    pub fn get_material_by_id(&self, id: &str) -> Option<Material> {
        self.inner.state.borrow().iter().find(|m| m.id == id).cloned()
    }

    /// Materials at or below their minimum stock.
    pub fn low_stock(&self) -> Vec<Material> {
        self.inner
            .state
            .borrow()
            .iter()
            .filter(|m| m.is_low_stock())
            .cloned()
            .collect()
    }

    /// Reads the local cache, seeding from the catalog when it is empty or
    /// unreadable, and installs the result as the current snapshot.
    #[instrument(skip(self))]
    pub async fn load(&self) -> MaterialList {
        let materials = match self.inner.local.read().await {
            Ok(Some(list)) if !list.is_empty() => {
                debug!(count = list.len(), "Loaded materials from local cache");
                list
            }
            Ok(_) => {
                info!("Local cache empty; seeding from catalog");
                catalog::seed_materials()
            }
            Err(e) => {
                warn!(error = %e, "Failed to read local cache; seeding from catalog");
                catalog::seed_materials()
            }
        };

        self.commit(move |_| Some(materials)).await
    }

    /// Writes the full list to the local cache. Failures are logged only.
    pub async fn persist_locally(&self, materials: &[Material]) {
        if let Err(e) = self.inner.local.write(materials).await {
            error!(error = %e, key = self.inner.local.key(), "Failed to persist materials locally");
        }
    }

    /// Follows the remote collection, merging each snapshot with pending-local
    /// records and passing the merged list to `on_change`.
    ///
    /// The returned handle stops the listener when cancelled or dropped. If the
    /// remote feed cannot be opened the handle is inactive and the local view
    /// is left as is.
    pub async fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: Fn(MaterialList) + Send + Sync + 'static,
    {
        let mut rx = match self.remote_call(|| self.inner.remote.subscribe()).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "Remote materials feed unavailable; staying on local data");
                return Subscription::inactive();
            }
        };

        let store = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let remote = rx.borrow_and_update().clone();
                let merged = store.merge_remote(remote).await;
                on_change(merged);
                if rx.changed().await.is_err() {
                    debug!("Remote materials feed closed");
                    break;
                }
            }
        });

        Subscription {
            handle: Some(handle),
        }
    }

    /// Applies a remote snapshot: remote records win, unmatched pending-local
    /// records are kept after them.
    pub async fn merge_remote(&self, remote: Vec<Material>) -> MaterialList {
        self.commit(move |local| {
            Some(
                merge_records(remote, local)
                    .into_iter()
                    .map(MaterialRecord::into_material)
                    .collect(),
            )
        })
        .await
    }

    /// Creates a material remotely, or keeps it as pending-local if the remote
    /// write fails. Only invalid input is reported as an error.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn add_material(&self, input: NewMaterial) -> Result<Material, ServiceError> {
        input.validate()?;
        let mut material = input.into_material();

        let remote = self.inner.remote.clone();
        match self.remote_call(|| remote.create(&material)).await {
            Ok(()) => {
                info!(material_id = %material.id, "Material created remotely");
            }
            Err(e) => {
                material.is_local = true;
                self.fall_back(FallbackOperation::Add, &material.id, &e);
            }
        }

        let record = material.clone();
        self.commit(move |list| {
            let mut next = list.to_vec();
            match next.iter_mut().find(|m| m.id == record.id) {
                Some(existing) => *existing = record,
                None => next.push(record),
            }
            Some(next)
        })
        .await;

        self.emit(Event::MaterialAdded {
            material_id: material.id.clone(),
            pending_local: material.is_local,
        });
        Ok(material)
    }

    /// Updates the named fields remotely, or on the local record if that fails.
    #[instrument(skip(self, patch))]
    pub async fn update_material(&self, id: &str, patch: MaterialPatch) {
        if patch.is_empty() {
            debug!("Empty patch; nothing to update");
            return;
        }

        let remote = self.inner.remote.clone();
        let updated = match self.remote_call(|| remote.update(id, &patch)).await {
            Ok(confirmed) => {
                self.commit(move |list| replace_record(list, confirmed)).await;
                true
            }
            Err(e) => {
                self.fall_back(FallbackOperation::Update, id, &e);
                let applied = self
                    .commit(|list| {
                        let mut next = list.to_vec();
                        let target = next.iter_mut().find(|m| m.id == id)?;
                        patch.apply_to(target);
                        Some(next)
                    })
                    .await;
                applied.iter().any(|m| m.id == id)
            }
        };

        if updated {
            let pending_local = self
                .get_material_by_id(id)
                .map_or(false, |m| m.is_local);
            self.emit(Event::MaterialUpdated {
                material_id: id.to_string(),
                pending_local,
            });
        } else {
            warn!(material_id = %id, "Update target not found locally");
        }
    }

    /// Adds `quantity` to a material's stock. Non-positive quantities are ignored.
    #[instrument(skip(self))]
    pub async fn restock_material(&self, id: &str, quantity: i64) {
        if quantity <= 0 {
            debug!("Ignoring non-positive restock quantity");
            return;
        }

        let remote = self.inner.remote.clone();
        let remote_result: Result<u32, ServiceError> = async {
            let current = self
                .remote_call(|| remote.get(id))
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("material {}", id)))?;
            let new_stock = current.stock_after_restock(quantity);
            self.remote_call(|| remote.set_stock(id, new_stock)).await?;
            Ok::<u32, ServiceError>(new_stock)
        }
        .await;

        let new_stock = match remote_result {
            Ok(new_stock) => {
                self.set_local_stock(id, new_stock).await;
                Some(new_stock)
            }
            Err(e) => {
                self.fall_back(FallbackOperation::Restock, id, &e);
                self.adjust_local_stock(id, |m| m.stock_after_restock(quantity))
                    .await
                    .map(|(_, after)| after)
            }
        };

        match new_stock {
            Some(new_stock) => self.emit(Event::MaterialRestocked {
                material_id: id.to_string(),
                quantity,
                new_stock,
            }),
            None => warn!(material_id = %id, "Restock target not found locally"),
        }
    }

    /// Removes `quantity` from a material's stock, floored at zero.
    ///
    /// Reads the current remote stock and writes back the difference; on any
    /// failure the local record is decremented instead. No validation happens
    /// here; see [`ReconciliationEngine`](super::reconciliation::ReconciliationEngine).
    #[instrument(skip(self))]
    pub async fn withdraw_stock(&self, id: &str, quantity: i64) {
        let remote = self.inner.remote.clone();
        let remote_result: Result<(u32, u32), ServiceError> = async {
            let current = self
                .remote_call(|| remote.get(id))
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("material {}", id)))?;
            let new_stock = current.stock_after_withdrawal(quantity);
            self.remote_call(|| remote.set_stock(id, new_stock)).await?;
            Ok::<(u32, u32), ServiceError>((current.stock, new_stock))
        }
        .await;

        let change = match remote_result {
            Ok((previous, new_stock)) => {
                self.set_local_stock(id, new_stock).await;
                Some((previous, new_stock))
            }
            Err(e) => {
                self.fall_back(FallbackOperation::Withdraw, id, &e);
                self.adjust_local_stock(id, |m| m.stock_after_withdrawal(quantity))
                    .await
            }
        };

        let Some((previous, new_stock)) = change else {
            warn!(material_id = %id, "Withdrawal target not found locally");
            return;
        };

        self.emit(Event::MaterialWithdrawn {
            material_id: id.to_string(),
            quantity,
            new_stock,
        });
        // Only the withdrawal that crosses the threshold raises the alert.
        if let Some(material) = self.get_material_by_id(id) {
            if previous > material.min_stock && new_stock <= material.min_stock {
                self.emit(Event::LowStock {
                    material_id: material.id,
                    name: material.name,
                    stock: new_stock,
                    min_stock: material.min_stock,
                });
            }
        }
    }

    /// Mirrors a confirmed remote stock value into the local view.
    async fn set_local_stock(&self, id: &str, stock: u32) {
        self.commit(|list| {
            let mut next = list.to_vec();
            let target = next.iter_mut().find(|m| m.id == id)?;
            target.stock = stock;
            target.is_local = false;
            Some(next)
        })
        .await;
    }

    /// Applies `f` to the local record's stock and returns `(before, after)`.
    async fn adjust_local_stock<F>(&self, id: &str, f: F) -> Option<(u32, u32)>
    where
        F: FnOnce(&Material) -> u32,
    {
        let mut before = None;
        let list = self
            .commit(|list| {
                let mut next = list.to_vec();
                let target = next.iter_mut().find(|m| m.id == id)?;
                before = Some(target.stock);
                target.stock = f(target);
                Some(next)
            })
            .await;
        let after = list.iter().find(|m| m.id == id).map(|m| m.stock)?;
        before.map(|before| (before, after))
    }

    /// Replaces the snapshot with `f(current)` and persists it. `None` leaves
    /// the snapshot and cache untouched. Returns the resulting snapshot.
    async fn commit<F>(&self, f: F) -> MaterialList
    where
        F: FnOnce(&[Material]) -> Option<Vec<Material>>,
    {
        let _guard = self.inner.commit_lock.lock().await;
        let current = self.snapshot();
        let Some(next) = f(&current) else {
            return current;
        };
        let next = Arc::new(next);
        self.inner.state.send_replace(next.clone());
        self.persist_locally(&next).await;
        next
    }

    async fn remote_call<T, F, Fut>(&self, op: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        self.inner.breaker.call(op).await
    }

    fn emit(&self, event: Event) {
        if let Some(events) = &self.inner.events {
            events.send_or_log(event);
        }
    }

    // Records that a remote write was replaced by a local one. A remote
    // `NotFound` is expected for pending-local records and only logged at debug.
    fn fall_back(&self, operation: FallbackOperation, id: &str, reason: &ServiceError) {
        if reason.is_transient() {
            warn!(
                ?operation,
                material_id = %id,
                error = %reason,
                "Remote write failed; applying locally"
            );
        } else {
            debug!(
                ?operation,
                material_id = %id,
                error = %reason,
                "Material not held remotely; applying locally"
            );
        }
        self.emit(Event::RemoteFallback {
            operation,
            material_id: id.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }
}

fn replace_record(list: &[Material], confirmed: Material) -> Option<Vec<Material>> {
    let mut next = list.to_vec();
    match next.iter_mut().find(|m| m.id == confirmed.id) {
        Some(existing) => *existing = confirmed,
        None => next.push(confirmed),
    }
    Some(next)
}

/// Handle to a running remote subscription. Dropping it stops the listener.
#[derive(Debug, Default)]
pub struct Subscription {
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    fn inactive() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheBackend, CacheError, InMemoryCache};
    use crate::events;
    use crate::models::UsageType;
    use crate::repositories::InMemoryMaterialRepository;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn material(id: &str, stock: u32, is_local: bool) -> Material {
        Material {
            id: id.into(),
            name: format!("Material {}", id),
            category: "electrical".into(),
            usage_type: UsageType::Consumable,
            unit: "pcs".into(),
            stock,
            min_stock: 1,
            is_local,
        }
    }

    fn store_with(remote: Arc<InMemoryMaterialRepository>) -> (StockStore, LocalMaterialCache) {
        let local = LocalMaterialCache::new(Arc::new(InMemoryCache::new()), "materials");
        let store = StockStore::new(
            remote,
            local.clone(),
            CircuitBreaker::new(100, Duration::from_secs(60)),
        );
        (store, local)
    }

    fn store_with_events(
        remote: Arc<InMemoryMaterialRepository>,
    ) -> (StockStore, mpsc::Receiver<Event>) {
        let (sender, rx) = events::channel(32);
        let store = StockStore::with_events(
            remote,
            LocalMaterialCache::new(Arc::new(InMemoryCache::new()), "materials"),
            CircuitBreaker::new(100, Duration::from_secs(60)),
            sender,
        );
        (store, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        seen
    }

    fn new_material(id: &str) -> NewMaterial {
        NewMaterial {
            id: Some(id.into()),
            name: format!("Material {}", id),
            category: "electrical".into(),
            usage_type: UsageType::Consumable,
            unit: "pcs".into(),
            stock: 4,
            min_stock: 1,
        }
    }

    struct BrokenCache;

    #[async_trait::async_trait]
    impl CacheBackend for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::OperationFailed("disk gone".into()))
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
            Err(CacheError::OperationFailed("disk gone".into()))
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Ok(())
        }
        async fn exists(&self, _key: &str) -> Result<bool, CacheError> {
            Ok(false)
        }
        async fn clear(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn commit_persists_every_change() {
        let (store, local) = store_with(Arc::new(InMemoryMaterialRepository::new()));
        store.merge_remote(vec![material("a", 3, false)]).await;
        assert_eq!(local.read().await.unwrap(), Some(vec![material("a", 3, false)]));
    }

    #[tokio::test]
    async fn unreadable_and_unwritable_cache_still_loads_seed() {
        let store = StockStore::new(
            Arc::new(InMemoryMaterialRepository::new()),
            LocalMaterialCache::new(Arc::new(BrokenCache), "materials"),
            CircuitBreaker::new(5, Duration::from_secs(60)),
        );
        let loaded = store.load().await;
        assert_eq!(loaded.len(), catalog::seed_materials().len());
        assert_eq!(store.snapshot(), loaded);
    }

    #[tokio::test]
    async fn open_circuit_short_circuits_to_local() {
        let remote = Arc::new(InMemoryMaterialRepository::with_documents(vec![material(
            "a", 5, false,
        )]));
        let local = LocalMaterialCache::new(Arc::new(InMemoryCache::new()), "materials");
        let store = StockStore::new(
            remote.clone(),
            local,
            CircuitBreaker::new(1, Duration::from_secs(60)),
        );
        store.merge_remote(vec![material("a", 5, false)]).await;

        remote.set_online(false);
        store.restock_material("a", 1).await;
        remote.set_online(true);
        store.restock_material("a", 1).await;

        assert_eq!(store.get_material_by_id("a").map(|m| m.stock), Some(7));
        assert_eq!(remote.document("a").map(|m| m.stock), Some(5));
    }

    #[tokio::test]
    async fn remote_not_found_does_not_trip_breaker() {
        let remote = Arc::new(InMemoryMaterialRepository::new());
        let local = LocalMaterialCache::new(Arc::new(InMemoryCache::new()), "materials");
        let breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        let store = StockStore::new(remote, local, breaker.clone());
        store.merge_remote(Vec::new()).await;

        store.restock_material("missing", 2).await;
        store.update_material("missing", MaterialPatch::stock(1)).await;
        store.update_material("missing", MaterialPatch::stock(2)).await;
        assert_eq!(breaker.state(), crate::circuit_breaker::CircuitState::Closed);
    }

    #[tokio::test]
    async fn low_stock_is_raised_once_when_threshold_is_crossed() {
        let tracked = Material {
            min_stock: 5,
            ..material("a", 10, false)
        };
        let remote = Arc::new(InMemoryMaterialRepository::with_documents(vec![
            tracked.clone(),
        ]));
        let (store, mut rx) = store_with_events(remote.clone());
        store.merge_remote(vec![tracked]).await;

        store.withdraw_stock("a", 6).await;
        let seen = drain(&mut rx);
        assert_matches!(
            seen.as_slice(),
            [
                Event::MaterialWithdrawn { new_stock: 4, .. },
                Event::LowStock { stock: 4, min_stock: 5, .. },
            ]
        );

        remote.set_online(false);
        store.withdraw_stock("a", 1).await;
        let seen = drain(&mut rx);
        assert_matches!(
            seen.as_slice(),
            [
                Event::RemoteFallback { operation: FallbackOperation::Withdraw, .. },
                Event::MaterialWithdrawn { new_stock: 3, .. },
            ]
        );
    }

    #[tokio::test]
    async fn withdrawal_landing_on_threshold_raises_low_stock() {
        let tracked = Material {
            min_stock: 5,
            ..material("a", 6, false)
        };
        let (store, mut rx) = store_with_events(Arc::new(InMemoryMaterialRepository::offline()));
        store.merge_remote(vec![tracked]).await;

        store.withdraw_stock("a", 1).await;
        let low: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, Event::LowStock { .. }))
            .collect();
        assert_matches!(low.as_slice(), [Event::LowStock { stock: 5, .. }]);
    }

    #[tokio::test]
    async fn offline_writes_report_their_fallback_operation() {
        let (store, mut rx) = store_with_events(Arc::new(InMemoryMaterialRepository::offline()));
        store.merge_remote(vec![material("a", 8, false)]).await;

        store.restock_material("a", 2).await;
        store.update_material("a", MaterialPatch::stock(9)).await;
        store.withdraw_stock("a", 1).await;

        let operations: Vec<FallbackOperation> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                Event::RemoteFallback {
                    operation,
                    material_id,
                    ..
                } => {
                    assert_eq!(material_id, "a");
                    Some(operation)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            operations,
            vec![
                FallbackOperation::Restock,
                FallbackOperation::Update,
                FallbackOperation::Withdraw,
            ]
        );
        assert_eq!(store.get_material_by_id("a").map(|m| m.stock), Some(8));
    }

    #[tokio::test]
    async fn added_material_reports_whether_it_is_pending_local() {
        let remote = Arc::new(InMemoryMaterialRepository::new());
        let (store, mut rx) = store_with_events(remote.clone());
        store.merge_remote(Vec::new()).await;

        store.add_material(new_material("online")).await.unwrap();
        remote.set_online(false);
        store.add_material(new_material("offline")).await.unwrap();

        let seen = drain(&mut rx);
        assert_matches!(
            seen.as_slice(),
            [
                Event::MaterialAdded { material_id: first, pending_local: false },
                Event::RemoteFallback { operation: FallbackOperation::Add, .. },
                Event::MaterialAdded { material_id: second, pending_local: true },
            ] if first == "online" && second == "offline"
        );
    }

    #[tokio::test]
    async fn subscription_cancel_stops_listener() {
        let remote = Arc::new(InMemoryMaterialRepository::new());
        let (store, _) = store_with(remote.clone());
        let mut sub = store.subscribe(|_| {}).await;
        assert!(sub.is_active());
        sub.cancel();
        assert!(!sub.is_active());

        remote.create(&material("late", 1, false)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.get_material_by_id("late").is_none());
    }

    #[tokio::test]
    async fn offline_subscribe_is_inactive() {
        let (store, _) = store_with(Arc::new(InMemoryMaterialRepository::offline()));
        let sub = store.subscribe(|_| {}).await;
        assert!(!sub.is_active());
    }
}
