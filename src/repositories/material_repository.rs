use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::{debug, instrument};

use crate::errors::ServiceError;
use crate::models::{Material, MaterialPatch};

/// The remote, authoritative `materials` collection.
///
/// Documents are keyed by material id and never carry the local-only flag.
/// Listings and change-feed snapshots are ordered by name ascending.
#[async_trait::async_trait]
pub trait MaterialRepository: Send + Sync {
    async fn list(&self) -> Result<Vec<Material>, ServiceError>;

    async fn get(&self, id: &str) -> Result<Option<Material>, ServiceError>;

    async fn create(&self, material: &Material) -> Result<(), ServiceError>;

    /// Updates the named fields of an existing document.
    async fn update(&self, id: &str, patch: &MaterialPatch) -> Result<Material, ServiceError>;

    async fn set_stock(&self, id: &str, stock: u32) -> Result<(), ServiceError>;

    /// Change feed delivering the full ordered collection on every write.
    async fn subscribe(&self) -> Result<watch::Receiver<Vec<Material>>, ServiceError>;
}

/// In-process stand-in for the hosted collection.
///
/// Can be switched offline, or told to reject writes for specific ids, to
/// exercise the stock store's fallback paths.
#[derive(Debug)]
pub struct InMemoryMaterialRepository {
    docs: RwLock<BTreeMap<String, Material>>,
    feed: watch::Sender<Vec<Material>>,
    online: AtomicBool,
    rejected_writes: RwLock<HashSet<String>>,
}

impl Default for InMemoryMaterialRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMaterialRepository {
    pub fn new() -> Self {
        let (feed, _) = watch::channel(Vec::new());
        Self {
            docs: RwLock::new(BTreeMap::new()),
            feed,
            online: AtomicBool::new(true),
            rejected_writes: RwLock::new(HashSet::new()),
        }
    }

    /// A repository that fails every call, as if the backend were unreachable.
    pub fn offline() -> Self {
        let repo = Self::new();
        repo.set_online(false);
        repo
    }

    pub fn with_documents(materials: impl IntoIterator<Item = Material>) -> Self {
        let repo = Self::new();
        {
            let mut docs = write_lock(&repo.docs);
            for mut material in materials {
                material.is_local = false;
                docs.insert(material.id.clone(), material);
            }
            repo.publish(&docs);
        }
        repo
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn reject_writes_for(&self, id: &str) {
        write_lock(&self.rejected_writes).insert(id.to_string());
    }

    pub fn allow_writes_for(&self, id: &str) {
        write_lock(&self.rejected_writes).remove(id);
    }

    /// Direct read of a stored document, bypassing availability checks.
    pub fn document(&self, id: &str) -> Option<Material> {
        read_lock(&self.docs).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.docs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_online(&self) -> Result<(), ServiceError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(ServiceError::RemoteUnavailable(
                "materials collection is unreachable".to_string(),
            ))
        }
    }

    fn ensure_writable(&self, id: &str) -> Result<(), ServiceError> {
        self.ensure_online()?;
        if read_lock(&self.rejected_writes).contains(id) {
            return Err(ServiceError::RemoteError(format!(
                "write rejected for material {}",
                id
            )));
        }
        Ok(())
    }

    fn ordered(docs: &BTreeMap<String, Material>) -> Vec<Material> {
        let mut list: Vec<Material> = docs.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        list
    }

    // Called with the write guard held so snapshots are published in write order.
    fn publish(&self, docs: &BTreeMap<String, Material>) {
        let snapshot = Self::ordered(docs);
        debug!(count = snapshot.len(), "Publishing materials snapshot");
        self.feed.send_replace(snapshot);
    }
}

#[async_trait::async_trait]
impl MaterialRepository for InMemoryMaterialRepository {
    async fn list(&self) -> Result<Vec<Material>, ServiceError> {
        self.ensure_online()?;
        Ok(Self::ordered(&read_lock(&self.docs)))
    }

    async fn get(&self, id: &str) -> Result<Option<Material>, ServiceError> {
        self.ensure_online()?;
        Ok(read_lock(&self.docs).get(id).cloned())
    }

    #[instrument(skip(self, material), fields(material_id = %material.id))]
    async fn create(&self, material: &Material) -> Result<(), ServiceError> {
        self.ensure_writable(&material.id)?;
        let mut docs = write_lock(&self.docs);
        let mut doc = material.clone();
        doc.is_local = false;
        docs.insert(doc.id.clone(), doc);
        self.publish(&docs);
        Ok(())
    }

    #[instrument(skip(self, patch))]
    async fn update(&self, id: &str, patch: &MaterialPatch) -> Result<Material, ServiceError> {
        self.ensure_writable(id)?;
        let mut docs = write_lock(&self.docs);
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| ServiceError::NotFound(format!("material {}", id)))?;
        patch.apply_to(doc);
        let updated = doc.clone();
        self.publish(&docs);
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn set_stock(&self, id: &str, stock: u32) -> Result<(), ServiceError> {
        self.ensure_writable(id)?;
        let mut docs = write_lock(&self.docs);
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| ServiceError::NotFound(format!("material {}", id)))?;
        doc.stock = stock;
        self.publish(&docs);
        Ok(())
    }

    async fn subscribe(&self) -> Result<watch::Receiver<Vec<Material>>, ServiceError> {
        self.ensure_online()?;
        Ok(self.feed.subscribe())
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UsageType;

    fn material(id: &str, name: &str, stock: u32) -> Material {
        Material {
            id: id.into(),
            name: name.into(),
            category: "network".into(),
            usage_type: UsageType::Consumable,
            unit: "m".into(),
            stock,
            min_stock: 0,
            is_local: true,
        }
    }

    #[tokio::test]
    async fn list_is_ordered_by_name() {
        let repo = InMemoryMaterialRepository::with_documents(vec![
            material("1", "Zip ties", 1),
            material("2", "Anchors", 1),
            material("3", "Modular plugs", 1),
        ]);
        let names: Vec<_> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["Anchors", "Modular plugs", "Zip ties"]);
    }

    #[tokio::test]
    async fn documents_never_store_local_flag() {
        let repo = InMemoryMaterialRepository::new();
        repo.create(&material("a", "A", 5)).await.unwrap();
        assert_eq!(repo.document("a").map(|m| m.is_local), Some(false));
    }

    #[tokio::test]
    async fn offline_repository_rejects_everything() {
        let repo = InMemoryMaterialRepository::offline();
        assert!(matches!(
            repo.list().await,
            Err(ServiceError::RemoteUnavailable(_))
        ));
        assert!(repo.create(&material("a", "A", 1)).await.is_err());
        assert!(repo.subscribe().await.is_err());
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn update_missing_document_is_not_found() {
        let repo = InMemoryMaterialRepository::new();
        assert!(matches!(
            repo.update("nope", &MaterialPatch::stock(3)).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            repo.set_stock("nope", 3).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejected_ids_fail_writes_but_not_reads() {
        let repo = InMemoryMaterialRepository::with_documents(vec![material("a", "A", 5)]);
        repo.reject_writes_for("a");
        assert!(repo.set_stock("a", 1).await.is_err());
        assert_eq!(repo.get("a").await.unwrap().map(|m| m.stock), Some(5));
        repo.allow_writes_for("a");
        repo.set_stock("a", 1).await.unwrap();
        assert_eq!(repo.document("a").map(|m| m.stock), Some(1));
    }

    #[tokio::test]
    async fn change_feed_sees_every_write() {
        let repo = InMemoryMaterialRepository::new();
        let mut rx = repo.subscribe().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());

        repo.create(&material("a", "A", 5)).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        repo.set_stock("a", 2).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update()[0].stock, 2);
    }
}
