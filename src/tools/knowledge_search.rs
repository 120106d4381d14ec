//! Knowledge retrieval as an agent tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::knowledge::{KnowledgeFilter, KnowledgeStore};
use crate::tools::Tool;

/// Lets agents query the knowledge corpus mid-task.
///
/// Args: `{"query": string, "category"?: string, "limit"?: number}`.
pub struct KnowledgeSearchTool {
    store: Arc<KnowledgeStore>,
}

impl KnowledgeSearchTool {
    pub fn new(store: Arc<KnowledgeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        "knowledge_search"
    }

    fn description(&self) -> &str {
        "Search the knowledge base; args: {\"query\": string, \"category\"?: string, \"limit\"?: number}"
    }

    async fn run(&self, args: Value) -> Result<Value, anyhow::Error> {
        let query = args
            .get("query")
            .and_then(|q| q.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing 'query' argument"))?;
        let limit = args
            .get("limit")
            .and_then(|l| l.as_u64())
            .unwrap_or(3)
            .clamp(1, 20) as usize;

        let filter = args
            .get("category")
            .and_then(|c| c.as_str())
            .and_then(|c| c.parse().ok())
            .map(|category| KnowledgeFilter {
                category: Some(category),
                tags: Default::default(),
            });

        let hits = self.store.search(query, limit, filter.as_ref()).await?;
        Ok(json!({
            "results": hits
                .iter()
                .map(|hit| {
                    json!({
                        "path": hit.id,
                        "category": hit.category.to_string(),
                        "score": hit.score,
                        "content": hit.content,
                    })
                })
                .collect::<Vec<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use crate::knowledge::{AddKnowledge, KnowledgeCategory};
    use crate::rag::InMemoryVectorIndex;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    #[tokio::test]
    async fn returns_matching_documents() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            KnowledgeStore::open(
                dir.path().join("knowledge"),
                Arc::new(HashEmbedder::new(64)),
                Arc::new(InMemoryVectorIndex::new(64)),
            )
            .unwrap(),
        );
        store
            .add(&AddKnowledge {
                category: KnowledgeCategory::Domain,
                path: "retries.md".into(),
                title: "Retry policy".into(),
                content: "Transient failures are retried with exponential backoff.".into(),
                tags: BTreeSet::new(),
                reason: "".into(),
            })
            .await
            .unwrap();

        let tool = KnowledgeSearchTool::new(store);
        let out = tool
            .run(json!({"query": "exponential backoff retries"}))
            .await
            .unwrap();
        let results = out["results"].as_array().unwrap();
        assert!(!results.is_empty());
        assert!(results[0]["content"]
            .as_str()
            .unwrap()
            .contains("exponential backoff"));
    }

    #[tokio::test]
    async fn missing_query_is_an_error() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            KnowledgeStore::open(
                dir.path().join("knowledge"),
                Arc::new(HashEmbedder::new(64)),
                Arc::new(InMemoryVectorIndex::new(64)),
            )
            .unwrap(),
        );
        let tool = KnowledgeSearchTool::new(store);
        assert!(tool.run(json!({})).await.is_err());
    }
}
