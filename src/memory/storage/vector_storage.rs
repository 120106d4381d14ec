//! Vector-index-backed storage.
//!
//! Each memory tier owns one `VectorStorage` with a distinct scope tag, so
//! tiers sharing a single index never see each other's records.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::embedder::Embedder;
use crate::memory::storage::interface::Storage;
use crate::rag::{MetadataFilter, VectorIndex, VectorRecord};

pub struct VectorStorage {
    /// Tier tag stamped onto every record ("short_term", "long_term", ...).
    scope: String,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl VectorStorage {
    pub fn new(scope: &str, embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            scope: scope.to_string(),
            embedder,
            index,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Save under a caller-chosen id, returning that id.
    pub async fn save_with_id(
        &self,
        id: &str,
        value: &str,
        metadata: &HashMap<String, Value>,
    ) -> Result<String, anyhow::Error> {
        let vector = self.embedder.embed(value).await?;
        let mut stamped = metadata.clone();
        stamped.insert("scope".to_string(), Value::String(self.scope.clone()));
        self.index
            .upsert(vec![VectorRecord {
                id: id.to_string(),
                vector,
                metadata: stamped,
                document: value.to_string(),
            }])
            .await?;
        Ok(id.to_string())
    }

    /// Search within this scope, with optional extra metadata constraints.
    pub async fn search_filtered(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f64,
        extra: Option<&MetadataFilter>,
    ) -> Result<Vec<Value>, anyhow::Error> {
        let vector = self.embedder.embed(query).await?;
        let mut filter = MetadataFilter::new();
        filter.insert("scope".to_string(), Value::String(self.scope.clone()));
        if let Some(extra) = extra {
            for (key, value) in extra {
                filter.insert(key.clone(), value.clone());
            }
        }

        let hits = self.index.query(&vector, limit, Some(&filter)).await?;
        Ok(hits
            .into_iter()
            .filter(|hit| f64::from(hit.score) >= score_threshold)
            .map(|hit| {
                json!({
                    "id": hit.id,
                    "content": hit.document,
                    "metadata": hit.metadata,
                    "score": hit.score,
                })
            })
            .collect())
    }

    pub async fn delete(&self, ids: &[String]) -> Result<(), anyhow::Error> {
        self.index.delete(ids).await
    }
}

#[async_trait]
impl Storage for VectorStorage {
    async fn save(
        &self,
        value: &str,
        metadata: &HashMap<String, Value>,
    ) -> Result<(), anyhow::Error> {
        self.save_with_id(&Uuid::new_v4().to_string(), value, metadata)
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &str,
        limit: usize,
        score_threshold: f64,
    ) -> Result<Vec<Value>, anyhow::Error> {
        self.search_filtered(query, limit, score_threshold, None)
            .await
    }

    async fn reset(&self) -> Result<(), anyhow::Error> {
        // Only this scope's records are dropped; other tiers sharing the
        // index keep theirs.
        let hits = self
            .search_filtered("", usize::MAX, f64::MIN, None)
            .await
            .unwrap_or_default();
        let ids: Vec<String> = hits
            .iter()
            .filter_map(|h| h["id"].as_str().map(String::from))
            .collect();
        self.index.delete(&ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use crate::rag::InMemoryVectorIndex;

    fn storage(scope: &str, index: Arc<InMemoryVectorIndex>) -> VectorStorage {
        VectorStorage::new(scope, Arc::new(HashEmbedder::new(64)), index)
    }

    #[tokio::test]
    async fn scopes_are_isolated_on_a_shared_index() {
        let index = Arc::new(InMemoryVectorIndex::new(64));
        let short = storage("short_term", index.clone());
        let long = storage("long_term", index.clone());

        short
            .save("short lived note about deployment", &HashMap::new())
            .await
            .unwrap();
        long.save("durable fact about deployment", &HashMap::new())
            .await
            .unwrap();

        let hits = short.search("deployment", 10, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0]["content"].as_str().unwrap().contains("short lived"));
    }

    #[tokio::test]
    async fn extra_filter_narrows_results() {
        let index = Arc::new(InMemoryVectorIndex::new(64));
        let storage = storage("short_term", index);

        let mut meta_a = HashMap::new();
        meta_a.insert("run_id".to_string(), Value::String("run-a".into()));
        storage
            .save("observation from run a about caching", &meta_a)
            .await
            .unwrap();

        let mut meta_b = HashMap::new();
        meta_b.insert("run_id".to_string(), Value::String("run-b".into()));
        storage
            .save("observation from run b about caching", &meta_b)
            .await
            .unwrap();

        let mut filter = MetadataFilter::new();
        filter.insert("run_id".to_string(), Value::String("run-a".into()));
        let hits = storage
            .search_filtered("caching observation", 10, 0.0, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0]["content"].as_str().unwrap().contains("run a"));
    }
}
