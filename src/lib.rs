//! FieldOps Materials
//!
//! Material stock tracking for field-service work orders: a stock store kept
//! in step with a remote collection and a local fallback cache, and a
//! reconciliation engine that validates and applies withdrawal batches.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod cache;
pub mod catalog;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod repositories;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheFactory, LocalMaterialCache},
    circuit_breaker::CircuitBreaker,
    config::AppConfig,
    errors::ServiceError,
    repositories::{InMemoryMaterialRepository, MaterialRepository},
    services::{ReconciliationEngine, StockStore, Subscription},
};

pub use crate::models::{Material, MaterialPatch, NewMaterial, UsageType};
pub use crate::services::{WithdrawRequest, WithdrawResult};

const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Owns every long-lived piece of the material services.
///
/// Build one at application start with [`initialize`](Self::initialize) and
/// hand out references; call [`shutdown`](Self::shutdown) on the way out to
/// stop the remote subscription and drain pending events.
pub struct MaterialsContext {
    config: AppConfig,
    remote: Arc<InMemoryMaterialRepository>,
    store: StockStore,
    engine: ReconciliationEngine,
    subscription: Subscription,
    event_task: JoinHandle<()>,
}

impl MaterialsContext {
    pub async fn initialize(config: AppConfig) -> Result<Self, ServiceError> {
        let backend =
            CacheFactory::create_cache(&config.local_cache_backend, &config.local_cache_dir)?;
        let local = LocalMaterialCache::new(backend, config.local_cache_key.clone());

        let remote = Arc::new(if config.is_offline() {
            InMemoryMaterialRepository::offline()
        } else {
            InMemoryMaterialRepository::new()
        });

        let (event_sender, rx) = events::channel(config.event_channel_capacity);
        let event_task = tokio::spawn(events::process_events(rx));

        let store = StockStore::with_events(
            remote.clone(),
            local,
            CircuitBreaker::with_config(config.circuit_breaker()),
            event_sender,
        );

        let loaded = store.load().await;
        if !config.is_offline() {
            hydrate_remote(remote.as_ref(), &loaded).await;
        }

        let subscription = store
            .subscribe(|materials| debug!(count = materials.len(), "Materials view refreshed"))
            .await;
        let engine = ReconciliationEngine::new(store.clone());

        info!(
            materials = loaded.len(),
            remote_backend = %config.remote_backend,
            "Material services initialized"
        );

        Ok(Self {
            config,
            remote,
            store,
            engine,
            subscription,
            event_task,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &StockStore {
        &self.store
    }

    pub fn engine(&self) -> &ReconciliationEngine {
        &self.engine
    }

    pub fn remote(&self) -> Arc<InMemoryMaterialRepository> {
        self.remote.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }

    /// Stops the remote subscription and waits briefly for queued events.
    ///
    /// Writes already in flight are not cancelled.
    pub async fn shutdown(self) {
        let Self {
            store,
            engine,
            mut subscription,
            event_task,
            ..
        } = self;

        subscription.cancel();
        drop(engine);
        drop(store);

        let abort = event_task.abort_handle();
        if tokio::time::timeout(EVENT_DRAIN_TIMEOUT, event_task)
            .await
            .is_err()
        {
            warn!("Event loop still busy at shutdown; aborting");
            abort.abort();
        }
        info!("Material services shut down");
    }
}

// The in-process remote starts empty; seed it with records confirmed in a
// previous session so they are not dropped by the first merge.
async fn hydrate_remote(remote: &InMemoryMaterialRepository, loaded: &[Material]) {
    for material in loaded.iter().filter(|m| !m.is_local) {
        if let Err(e) = remote.create(material).await {
            warn!(material_id = %material.id, error = %e, "Failed to hydrate remote document");
        }
    }
}
