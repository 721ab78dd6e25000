//! Seed catalog used when neither the remote store nor the local cache has
//! any materials yet. Every seeded record starts out pending-local.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::models::{Material, UsageType};

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Category {
    Electrical,
    Network,
    Tools,
    Multimedia,
    Consumables,
}

struct SeedEntry {
    id: &'static str,
    name: &'static str,
    category: Category,
    usage_type: UsageType,
    unit: &'static str,
    stock: u32,
    min_stock: u32,
}

const fn seed(
    id: &'static str,
    name: &'static str,
    category: Category,
    usage_type: UsageType,
    unit: &'static str,
    stock: u32,
    min_stock: u32,
) -> SeedEntry {
    SeedEntry {
        id,
        name,
        category,
        usage_type,
        unit,
        stock,
        min_stock,
    }
}

use Category::*;
use UsageType::{Consumable, Returnable};

const SEED: &[SeedEntry] = &[
    seed("elec-001", "Power cable VCT 2x1.5mm", Electrical, Consumable, "m", 500, 100),
    seed("elec-002", "Power outlet, duplex", Electrical, Consumable, "pcs", 60, 10),
    seed("elec-003", "Circuit breaker 16A", Electrical, Consumable, "pcs", 25, 5),
    seed("elec-004", "Electrical tape", Electrical, Consumable, "roll", 80, 20),
    seed("net-001", "LAN cable Cat6", Network, Consumable, "m", 1000, 200),
    seed("net-002", "RJ45 connector", Network, Consumable, "pcs", 400, 100),
    seed("net-003", "Network switch 8-port", Network, Consumable, "pcs", 12, 2),
    seed("net-004", "Wall patch box", Network, Consumable, "pcs", 40, 10),
    seed("tool-001", "Crimping tool RJ45", Tools, Returnable, "pcs", 6, 2),
    seed("tool-002", "LAN cable tester", Tools, Returnable, "pcs", 4, 1),
    seed("tool-003", "Cordless drill", Tools, Returnable, "pcs", 5, 1),
    seed("tool-004", "Digital multimeter", Tools, Returnable, "pcs", 5, 1),
    seed("mm-001", "HDMI cable 2.0 5m", Multimedia, Consumable, "pcs", 30, 5),
    seed("mm-002", "Projector ceiling mount", Multimedia, Consumable, "pcs", 8, 2),
    seed("mm-003", "Wireless microphone set", Multimedia, Returnable, "set", 3, 1),
    seed("cons-001", "Cable ties 8 inch", Consumables, Consumable, "pack", 50, 10),
    seed("cons-002", "Wall anchors with screws", Consumables, Consumable, "pack", 40, 10),
    seed("cons-003", "Cable clips", Consumables, Consumable, "pack", 35, 10),
];

impl SeedEntry {
    fn to_material(&self) -> Material {
        Material {
            id: self.id.to_string(),
            name: self.name.to_string(),
            category: self.category.to_string(),
            usage_type: self.usage_type,
            unit: self.unit.to_string(),
            stock: self.stock,
            min_stock: self.min_stock,
            is_local: true,
        }
    }
}

/// The full seed list, all marked pending-local.
pub fn seed_materials() -> Vec<Material> {
    SEED.iter().map(SeedEntry::to_material).collect()
}

/// Seed materials belonging to one category.
pub fn by_category(category: Category) -> Vec<Material> {
    SEED.iter()
        .filter(|entry| entry.category == category)
        .map(SeedEntry::to_material)
        .collect()
}

/// Seed materials grouped by category, in declaration order.
pub fn grouped() -> Vec<(Category, Vec<Material>)> {
    Category::iter().map(|c| (c, by_category(c))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::str::FromStr;

    #[test]
    fn seed_ids_are_unique_and_local() {
        let materials = seed_materials();
        let ids: HashSet<_> = materials.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids.len(), materials.len());
        assert!(materials.iter().all(|m| m.is_local));
    }

    #[test]
    fn every_category_is_seeded() {
        for (category, materials) in grouped() {
            assert!(!materials.is_empty(), "no seed for {}", category);
            assert!(materials.iter().all(|m| m.category == category.as_ref()));
        }
    }

    #[test]
    fn category_parses_case_insensitively() {
        assert_eq!(Category::from_str("Network").ok(), Some(Category::Network));
        assert_eq!(Category::from_str("tools").ok(), Some(Category::Tools));
        assert!(Category::from_str("plumbing").is_err());
    }

    #[test]
    fn tools_are_returnable() {
        assert!(by_category(Category::Tools)
            .iter()
            .all(|m| m.usage_type == UsageType::Returnable));
    }
}
