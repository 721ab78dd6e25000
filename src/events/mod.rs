use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::ServiceError;

/// Which stock-store operation fell back to local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackOperation {
    Add,
    Update,
    Restock,
    Withdraw,
}

// Define the various events that can occur around material stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    MaterialAdded {
        material_id: String,
        pending_local: bool,
    },
    MaterialUpdated {
        material_id: String,
        pending_local: bool,
    },
    MaterialRestocked {
        material_id: String,
        quantity: i64,
        new_stock: u32,
    },
    MaterialWithdrawn {
        material_id: String,
        quantity: i64,
        new_stock: u32,
    },
    LowStock {
        material_id: String,
        name: String,
        stock: u32,
        min_stock: u32,
    },
    RemoteFallback {
        operation: FallbackOperation,
        material_id: String,
        reason: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Queues an event without waiting. A full or closed channel drops the
    /// event with a warning; stock operations never block on observers.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping material event: {}", e);
        }
    }
}

/// Creates a bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::MaterialAdded {
                material_id,
                pending_local,
            } => {
                info!(%material_id, pending_local, "Material added");
            }
            Event::MaterialUpdated {
                material_id,
                pending_local,
            } => {
                debug!(%material_id, pending_local, "Material updated");
            }
            Event::MaterialRestocked {
                material_id,
                quantity,
                new_stock,
            } => {
                info!(%material_id, quantity, new_stock, "Material restocked");
            }
            Event::MaterialWithdrawn {
                material_id,
                quantity,
                new_stock,
            } => {
                info!(%material_id, quantity, new_stock, "Material withdrawn");
            }
            Event::LowStock {
                material_id,
                name,
                stock,
                min_stock,
            } => {
                warn!(%material_id, %name, stock, min_stock, "Material at or below minimum stock");
            }
            Event::RemoteFallback {
                operation,
                material_id,
                reason,
                at,
            } => {
                warn!(
                    ?operation,
                    %material_id,
                    %reason,
                    at = %at.to_rfc3339(),
                    "Remote write failed; applied locally"
                );
            }
        }
    }

    info!("Event processing loop has ended");
}
