//! Vector index capability.

pub mod vector_index;

pub use vector_index::{InMemoryVectorIndex, MetadataFilter, SearchHit, VectorIndex, VectorRecord};
