//! Storage backends for the memory tiers.

pub mod interface;
pub mod vector_storage;

pub use interface::Storage;
pub use vector_storage::VectorStorage;
