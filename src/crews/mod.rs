//! Crew compilation and results.

pub mod crew_output;
pub mod plan;
pub mod registry;
pub mod schema;

pub use crew_output::CrewResult;
pub use plan::{compile, ExecutionPlan};
pub use registry::CrewRegistry;
pub use schema::{OutputSchema, SchemaRegistry};
