//! Vector index trait and the default in-memory implementation.
//!
//! The index is treated as concurrent-safe by callers. The in-memory
//! implementation serves local runs and tests; a persistent vector database
//! slots in behind the same trait.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::embedder::cosine_similarity;

/// Equality filter over record metadata: every listed key must match.
pub type MetadataFilter = HashMap<String, Value>;

/// A record stored in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: HashMap<String, Value>,
    pub document: String,
}

/// A query result with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub document: String,
    pub metadata: HashMap<String, Value>,
}

/// Upsert/query/delete over (id, vector, metadata, document).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimension every stored vector must have.
    fn dimension(&self) -> usize;

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), anyhow::Error>;

    /// Top-k nearest records by cosine similarity, optionally constrained
    /// by a metadata equality filter.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, anyhow::Error>;

    async fn delete(&self, ids: &[String]) -> Result<(), anyhow::Error>;

    async fn reset(&self) -> Result<(), anyhow::Error>;
}

fn matches_filter(metadata: &HashMap<String, Value>, filter: &MetadataFilter) -> bool {
    filter
        .iter()
        .all(|(key, expected)| metadata.get(key) == Some(expected))
}

/// In-process index over a `RwLock`ed map. Reads are concurrent; the write
/// lock is held only for the duration of an upsert or delete.
pub struct InMemoryVectorIndex {
    dimension: usize,
    entries: RwLock<HashMap<String, VectorRecord>>,
}

impl InMemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<(), anyhow::Error> {
        for record in &records {
            if record.vector.len() != self.dimension {
                anyhow::bail!(
                    "embedding dimension mismatch: index expects {}, record '{}' has {}",
                    self.dimension,
                    record.id,
                    record.vector.len()
                );
            }
        }
        let mut entries = self.entries.write();
        for record in records {
            entries.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, anyhow::Error> {
        if vector.len() != self.dimension {
            anyhow::bail!(
                "embedding dimension mismatch: index expects {}, query has {}",
                self.dimension,
                vector.len()
            );
        }

        let entries = self.entries.read();
        let mut hits: Vec<SearchHit> = entries
            .values()
            .filter(|record| match filter {
                Some(f) => matches_filter(&record.metadata, f),
                None => true,
            })
            .map(|record| SearchHit {
                id: record.id.clone(),
                score: cosine_similarity(vector, &record.vector),
                document: record.document.clone(),
                metadata: record.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), anyhow::Error> {
        let mut entries = self.entries.write();
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }

    async fn reset(&self) -> Result<(), anyhow::Error> {
        self.entries.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{Embedder, HashEmbedder};

    fn record(id: &str, vector: Vec<f32>, document: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            vector,
            metadata: HashMap::new(),
            document: document.to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_rejects_mismatched_dimension() {
        let index = InMemoryVectorIndex::new(4);
        let err = index
            .upsert(vec![record("a", vec![1.0, 0.0], "short vector")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn query_ranks_by_similarity_and_honors_filter() {
        let embedder = HashEmbedder::new(64);
        let index = InMemoryVectorIndex::new(64);

        let mut rust = record(
            "rust",
            embedder.embed("rust ownership borrowing").await.unwrap(),
            "rust ownership borrowing",
        );
        rust.metadata
            .insert("category".into(), Value::String("domain".into()));
        let cooking = record(
            "cooking",
            embedder.embed("soup recipes and seasoning").await.unwrap(),
            "soup recipes and seasoning",
        );
        index.upsert(vec![rust, cooking]).await.unwrap();

        let query = embedder.embed("rust borrowing rules").await.unwrap();
        let hits = index.query(&query, 2, None).await.unwrap();
        assert_eq!(hits[0].id, "rust");

        let mut filter = MetadataFilter::new();
        filter.insert("category".into(), Value::String("domain".into()));
        let hits = index.query(&query, 2, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "rust");
    }

    #[tokio::test]
    async fn upsert_replaces_existing_id() {
        let index = InMemoryVectorIndex::new(2);
        index
            .upsert(vec![record("a", vec![1.0, 0.0], "first")])
            .await
            .unwrap();
        index
            .upsert(vec![record("a", vec![0.0, 1.0], "second")])
            .await
            .unwrap();
        assert_eq!(index.len(), 1);

        let hits = index.query(&[0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(hits[0].document, "second");
    }
}
