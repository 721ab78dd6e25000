// Material models
pub mod material;

pub use material::{
    merge_records, Material, MaterialPatch, MaterialRecord, NewMaterial, UsageType,
};
