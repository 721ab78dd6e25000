use std::collections::HashMap;

use serde::{Deserialize, Serialize, Serializer};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::stock_store::StockStore;
use crate::models::Material;

/// One line of a withdrawal batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawRequest {
    pub material_id: String,
    pub quantity: i64,
}

impl WithdrawRequest {
    pub fn new(material_id: impl Into<String>, quantity: i64) -> Self {
        Self {
            material_id: material_id.into(),
            quantity,
        }
    }
}

/// Outcome of a withdrawal batch. A rejected batch changes nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawResult {
    Success,
    Rejected { errors: Vec<String> },
}

impl WithdrawResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn errors(&self) -> &[String] {
        match self {
            Self::Success => &[],
            Self::Rejected { errors } => errors,
        }
    }
}

// Wire shape: {"success": true} or {"success": false, "errors": [...]}
impl Serialize for WithdrawResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            success: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            errors: Option<&'a [String]>,
        }

        let wire = match self {
            Self::Success => Wire {
                success: true,
                errors: None,
            },
            Self::Rejected { errors } => Wire {
                success: false,
                errors: Some(errors.as_slice()),
            },
        };
        wire.serialize(serializer)
    }
}

pub const NO_ITEMS_ERROR: &str = "no withdrawal items";

/// Sums quantities per material id, keeping first-appearance order.
pub fn aggregate(requests: &[WithdrawRequest]) -> Vec<(String, i64)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut totals: Vec<(String, i64)> = Vec::new();

    for request in requests {
        match index.get(request.material_id.as_str()) {
            Some(&pos) => {
                totals[pos].1 = totals[pos].1.saturating_add(request.quantity);
            }
            None => {
                index.insert(request.material_id.as_str(), totals.len());
                totals.push((request.material_id.clone(), request.quantity));
            }
        }
    }

    totals
}

/// Checks aggregated withdrawals against a snapshot, collecting every problem.
pub fn validate(aggregated: &[(String, i64)], snapshot: &[Material]) -> Vec<String> {
    let mut errors = Vec::new();

    for (material_id, quantity) in aggregated {
        let Some(material) = snapshot.iter().find(|m| &m.id == material_id) else {
            errors.push(format!("material not found: {}", material_id));
            continue;
        };

        if *quantity <= 0 {
            errors.push(format!(
                "quantity for {} must be greater than zero",
                material.name
            ));
        } else if *quantity > i64::from(material.stock) {
            errors.push(format!(
                "{} insufficient stock ({} {})",
                material.name, material.stock, material.unit
            ));
        }
    }

    errors
}

/// Validates and applies withdrawal batches against a [`StockStore`].
///
/// Validation is all-or-nothing against a point-in-time snapshot. Once a
/// batch passes, each material's deduction runs as its own background task
/// and the caller is answered without waiting for them. Deductions are not
/// coordinated across materials or across concurrent batches; the only
/// guarantee is that stock never drops below zero.
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: StockStore,
}

impl ReconciliationEngine {
    pub fn new(store: StockStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StockStore {
        &self.store
    }

    /// Validates the batch and, if it passes, detaches the stock writes.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn withdraw_materials(&self, requests: &[WithdrawRequest]) -> WithdrawResult {
        let (result, _detached) = self.withdraw_materials_tracked(requests);
        result
    }

    /// Same as [`withdraw_materials`](Self::withdraw_materials), but hands back
    /// the spawned per-material tasks so callers that must outlive them (the
    /// CLI, tests) can await completion.
    #[instrument(skip(self, requests), fields(lines = requests.len()))]
    pub fn withdraw_materials_tracked(
        &self,
        requests: &[WithdrawRequest],
    ) -> (WithdrawResult, Vec<JoinHandle<()>>) {
        if requests.is_empty() {
            return (
                WithdrawResult::Rejected {
                    errors: vec![NO_ITEMS_ERROR.to_string()],
                },
                Vec::new(),
            );
        }

        let aggregated = aggregate(requests);
        let snapshot = self.store.snapshot();
        let errors = validate(&aggregated, &snapshot);

        if !errors.is_empty() {
            warn!(error_count = errors.len(), "Withdrawal rejected");
            return (WithdrawResult::Rejected { errors }, Vec::new());
        }

        info!(materials = aggregated.len(), "Withdrawal accepted");
        let handles = aggregated
            .into_iter()
            .map(|(material_id, quantity)| {
                let store = self.store.clone();
                tokio::spawn(async move { store.withdraw_stock(&material_id, quantity).await })
            })
            .collect();

        (WithdrawResult::Success, handles)
    }
}
