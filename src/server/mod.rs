//! Axum HTTP surface for task submission and system introspection.

pub mod routes;

pub use routes::{app_router, AppState, TaskRequest, TaskResponse};
