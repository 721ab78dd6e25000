use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;
use validator::Validate;

/// How a material leaves stock when used on a job.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum UsageType {
    /// Permanently deducted once used.
    Consumable,
    /// Tracked in the catalog; no return-to-stock flow exists.
    Returnable,
}

/// A stock-tracked material.
///
/// `is_local` marks a record that only exists in the local fallback cache and
/// has not been confirmed by the remote store. It is never written remotely.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub id: String,
    pub name: String,
    pub category: String,
    pub usage_type: UsageType,
    pub unit: String,
    pub stock: u32,
    pub min_stock: u32,
    #[serde(default)]
    pub is_local: bool,
}

impl Material {
    /// At or below the informational reorder threshold.
    pub fn is_low_stock(&self) -> bool {
        self.stock <= self.min_stock
    }

    /// Stock after removing `quantity`, floored at zero.
    pub fn stock_after_withdrawal(&self, quantity: i64) -> u32 {
        let quantity = u32::try_from(quantity.max(0)).unwrap_or(u32::MAX);
        self.stock.saturating_sub(quantity)
    }

    /// Stock after adding `quantity`, saturating at `u32::MAX`.
    pub fn stock_after_restock(&self, quantity: i64) -> u32 {
        let quantity = u32::try_from(quantity.max(0)).unwrap_or(u32::MAX);
        self.stock.saturating_add(quantity)
    }
}

/// A material together with where it is known to exist.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MaterialRecord {
    /// Confirmed by the remote store.
    Remote(Material),
    /// Only present in the local cache, awaiting confirmation.
    PendingLocal(Material),
}

impl MaterialRecord {
    pub fn id(&self) -> &str {
        &self.material().id
    }

    pub fn material(&self) -> &Material {
        match self {
            Self::Remote(m) | Self::PendingLocal(m) => m,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingLocal(_))
    }

    /// Flattens back into a `Material`, with `is_local` reflecting the variant.
    pub fn into_material(self) -> Material {
        match self {
            Self::Remote(mut m) => {
                m.is_local = false;
                m
            }
            Self::PendingLocal(mut m) => {
                m.is_local = true;
                m
            }
        }
    }
}

impl From<Material> for MaterialRecord {
    fn from(material: Material) -> Self {
        if material.is_local {
            Self::PendingLocal(material)
        } else {
            Self::Remote(material)
        }
    }
}

/// Merges a remote snapshot with the current local view.
///
/// Remote records win: every remote record is kept in the order given, then
/// pending-local records whose id does not appear remotely are appended.
/// Local records that were previously confirmed are dropped, the remote
/// snapshot being authoritative for them.
pub fn merge_records(remote: Vec<Material>, local: &[Material]) -> Vec<MaterialRecord> {
    let remote_ids: HashSet<&str> = remote.iter().map(|m| m.id.as_str()).collect();

    let pending: Vec<MaterialRecord> = local
        .iter()
        .cloned()
        .map(MaterialRecord::from)
        .filter(|r| r.is_pending() && !remote_ids.contains(r.id()))
        .collect();

    remote
        .into_iter()
        .map(MaterialRecord::Remote)
        .chain(pending)
        .collect()
}

/// Input for creating a material at runtime.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewMaterial {
    #[validate(length(min = 1, max = 128))]
    pub id: Option<String>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub category: String,
    pub usage_type: UsageType,
    #[validate(length(min = 1, max = 32))]
    pub unit: String,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub min_stock: u32,
}

impl NewMaterial {
    /// Builds the record, generating an id when none was supplied.
    pub fn into_material(self) -> Material {
        Material {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: self.name,
            category: self.category,
            usage_type: self.usage_type,
            unit: self.unit,
            stock: self.stock,
            min_stock: self.min_stock,
            is_local: false,
        }
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_type: Option<UsageType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_stock: Option<u32>,
}

impl MaterialPatch {
    pub fn stock(stock: u32) -> Self {
        Self {
            stock: Some(stock),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(&self, material: &mut Material) {
        if let Some(name) = &self.name {
            material.name = name.clone();
        }
        if let Some(category) = &self.category {
            material.category = category.clone();
        }
        if let Some(usage_type) = self.usage_type {
            material.usage_type = usage_type;
        }
        if let Some(unit) = &self.unit {
            material.unit = unit.clone();
        }
        if let Some(stock) = self.stock {
            material.stock = stock;
        }
        if let Some(min_stock) = self.min_stock {
            material.min_stock = min_stock;
        }
    }
}
