pub mod material_repository;

pub use material_repository::{InMemoryMaterialRepository, MaterialRepository};
