use std::sync::Arc;
use tracing::{debug, instrument};

use super::{CacheBackend, CacheError};
use crate::models::Material;

pub const DEFAULT_MATERIALS_KEY: &str = "materials";

/// The material list stored under a single cache key as one JSON array.
#[derive(Clone)]
pub struct LocalMaterialCache {
    backend: Arc<dyn CacheBackend>,
    key: String,
}

impl LocalMaterialCache {
    pub fn new(backend: Arc<dyn CacheBackend>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the cached list. A missing key reads as `None`.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn read(&self) -> Result<Option<Vec<Material>>, CacheError> {
        match self.backend.get(&self.key).await? {
            Some(raw) => {
                let materials: Vec<Material> = serde_json::from_str(&raw)?;
                debug!(count = materials.len(), "Read materials from local cache");
                Ok(Some(materials))
            }
            None => Ok(None),
        }
    }

    /// Replaces the cached list wholesale.
    pub async fn write(&self, materials: &[Material]) -> Result<(), CacheError> {
        let raw = serde_json::to_string(materials)?;
        self.backend.set(&self.key, &raw).await
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.backend.delete(&self.key).await
    }
}
