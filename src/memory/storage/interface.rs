//! Storage seam for the memory tiers.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

/// Backend storage every memory tier writes through.
///
/// Results from `search` are JSON objects of the shape
/// `{"id", "content", "metadata", "score"}`.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save(
        &self,
        value: &str,
        metadata: &HashMap<String, Value>,
    ) -> Result<(), anyhow::Error>;

    async fn search(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<Value>, anyhow::Error>;

    async fn reset(&self) -> Result<(), anyhow::Error>;
}
