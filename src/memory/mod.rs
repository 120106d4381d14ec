//! Memory tiers and the facade the orchestrator talks to.
//!
//! Three tiers back the engine: short-term (per-run), long-term (cross-run),
//! and entity memory, all vector-indexed. Retrieval is tier-scoped: a search
//! only widens to a named tier via an explicit kind filter, and short-term
//! hits never leave their run.

pub mod entity;
pub mod external;
pub mod long_term;
pub mod short_term;
pub mod storage;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use entity::{EntityFact, EntityMemory, EntityRecord};
pub use external::{ExternalMemory, ExternalMemoryProvider};
pub use long_term::{LongTermMemory, LongTermRecord};
pub use short_term::{ShortTermItem, ShortTermMemory};
pub use storage::{Storage, VectorStorage};

use crate::embedder::Embedder;
use crate::rag::VectorIndex;

/// Entries emitted into the short-term block at task start.
const RECENT_WINDOW: usize = 20;
/// Semantic hits emitted alongside the recent entries.
const SEMANTIC_K: usize = 5;

/// Which tier a scoped search targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    Short,
    Long,
    Entity,
}

/// The memory layer as one object.
pub struct MemoryStore {
    pub short_term: ShortTermMemory,
    pub long_term: LongTermMemory,
    pub entity: EntityMemory,
    external: Option<ExternalMemory>,
}

impl MemoryStore {
    /// Build all three tiers over a shared embedder and vector index. The
    /// long-term SQLite database lives under `storage_dir`.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        storage_dir: PathBuf,
        short_term_window: usize,
    ) -> Result<Self, anyhow::Error> {
        let short_term = ShortTermMemory::new(
            short_term_window,
            VectorStorage::new("short_term", embedder.clone(), index.clone()),
        );
        let long_term = LongTermMemory::new(
            storage_dir.join("long_term_memory.db"),
            VectorStorage::new("long_term", embedder.clone(), index.clone()),
        )?;
        let entity = EntityMemory::new(VectorStorage::new("entities", embedder, index));
        Ok(Self {
            short_term,
            long_term,
            entity,
            external: None,
        })
    }

    /// Attach a mem0-style sidecar that mirrors saves and searches.
    pub fn with_external(mut self, external: ExternalMemory) -> Self {
        self.external = Some(external);
        self
    }

    /// The retrieval-augmented context block injected at task start: the
    /// run's recent short-term entries, its top semantic hits for the task,
    /// and related long-term and entity memory.
    pub async fn task_context(&self, run_id: Uuid, task_description: &str) -> String {
        let mut sections = Vec::new();

        let recent = self.short_term.recent(run_id, RECENT_WINDOW);
        let hits = self
            .short_term
            .search(run_id, task_description, SEMANTIC_K)
            .await
            .unwrap_or_default();
        if !recent.is_empty() || !hits.is_empty() {
            let mut lines = vec!["## Recent activity".to_string()];
            for item in &recent {
                match &item.agent {
                    Some(agent) => lines.push(format!("- [{}] {}", agent, item.data)),
                    None => lines.push(format!("- {}", item.data)),
                }
            }
            for hit in &hits {
                if let Some(content) = hit["content"].as_str() {
                    if !recent.iter().any(|item| item.data == content) {
                        lines.push(format!("- (related) {}", content));
                    }
                }
            }
            sections.push(lines.join("\n"));
        }

        let long_hits = self
            .long_term
            .search(task_description, SEMANTIC_K, None)
            .await
            .unwrap_or_default();
        if !long_hits.is_empty() {
            let mut lines = vec!["## Past learnings".to_string()];
            for hit in &long_hits {
                if let Some(content) = hit["content"].as_str() {
                    lines.push(format!("- {}", content));
                }
            }
            sections.push(lines.join("\n"));
        }

        let entity_hits = self
            .entity
            .search(task_description, SEMANTIC_K)
            .await
            .unwrap_or_default();
        if !entity_hits.is_empty() {
            let mut lines = vec!["## Known entities".to_string()];
            for hit in &entity_hits {
                if let Some(content) = hit["content"].as_str() {
                    lines.push(content.to_string());
                }
            }
            sections.push(lines.join("\n"));
        }

        if let Some(external) = &self.external {
            let external_hits = external.mirror_search(task_description, SEMANTIC_K).await;
            if !external_hits.is_empty() {
                let mut lines = vec!["## External memory".to_string()];
                for hit in &external_hits {
                    if let Some(content) = hit["content"].as_str() {
                        lines.push(format!("- {}", content));
                    }
                }
                sections.push(lines.join("\n"));
            }
        }

        sections.join("\n\n")
    }

    /// Record one task's outcome into short-term memory (mirrored to the
    /// sidecar when configured).
    pub async fn record_step(
        &self,
        run_id: Uuid,
        agent: &str,
        task_name: &str,
        output: &str,
    ) -> Result<(), anyhow::Error> {
        let mut metadata = HashMap::new();
        metadata.insert("task".to_string(), Value::String(task_name.to_string()));
        let entry = format!("task '{}' produced: {}", task_name, truncate(output, 500));
        self.short_term
            .save(run_id, &entry, Some(agent), metadata.clone())
            .await?;
        if let Some(external) = &self.external {
            external.mirror_save(&entry, &metadata).await;
        }
        Ok(())
    }

    /// End-of-run flush: promoted short-term entries and the final-output
    /// summary go to long-term; everything else is discarded.
    pub async fn finish_run(
        &self,
        run_id: Uuid,
        crew_name: &str,
        final_output: &str,
        agent_facts: &[(String, String)],
    ) -> Result<(), anyhow::Error> {
        let promoted = self.short_term.finish_run(run_id).await;
        for item in promoted {
            self.long_term
                .save(&LongTermRecord {
                    content: item.data,
                    agent: item.agent,
                    metadata: item.metadata,
                    score: 0.5,
                })
                .await?;
        }

        if !final_output.is_empty() {
            let mut metadata = HashMap::new();
            metadata.insert("crew".to_string(), Value::String(crew_name.to_string()));
            metadata.insert("run_id".to_string(), Value::String(run_id.to_string()));
            self.long_term
                .save(&LongTermRecord {
                    content: format!(
                        "crew '{}' final output: {}",
                        crew_name,
                        truncate(final_output, 800)
                    ),
                    agent: None,
                    metadata,
                    score: 0.7,
                })
                .await?;
        }

        for (agent, fact) in agent_facts {
            self.long_term
                .save(&LongTermRecord {
                    content: fact.clone(),
                    agent: Some(agent.clone()),
                    metadata: HashMap::new(),
                    score: 0.6,
                })
                .await?;
        }
        Ok(())
    }

    /// Search the memory layer. Without a kind filter, long-term and entity
    /// tiers are queried; `MemoryKind::Short` additionally scopes to the
    /// given run. Results are the union of local and external hits,
    /// deduplicated by id and ordered by score.
    pub async fn search(
        &self,
        run_id: Uuid,
        query: &str,
        kind: Option<MemoryKind>,
        k: usize,
    ) -> Result<Vec<Value>, anyhow::Error> {
        let mut hits: Vec<Value> = Vec::new();
        match kind {
            Some(MemoryKind::Short) => {
                hits.extend(self.short_term.search(run_id, query, k).await?);
            }
            Some(MemoryKind::Long) => {
                hits.extend(self.long_term.search(query, k, None).await?);
            }
            Some(MemoryKind::Entity) => {
                hits.extend(self.entity.search(query, k).await?);
            }
            None => {
                hits.extend(self.long_term.search(query, k, None).await?);
                hits.extend(self.entity.search(query, k).await?);
            }
        }

        if let Some(external) = &self.external {
            hits.extend(external.mirror_search(query, k).await);
        }

        hits.sort_by(|a, b| {
            let sa = a["score"].as_f64().unwrap_or(0.0);
            let sb = b["score"].as_f64().unwrap_or(0.0);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut seen = std::collections::HashSet::new();
        hits.retain(|hit| {
            let id = hit["id"].as_str().unwrap_or_default().to_string();
            seen.insert(id)
        });
        hits.truncate(k);
        Ok(hits)
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use crate::rag::InMemoryVectorIndex;
    use tempfile::tempdir;

    fn store(dir: &std::path::Path) -> MemoryStore {
        MemoryStore::new(
            Arc::new(HashEmbedder::new(64)),
            Arc::new(InMemoryVectorIndex::new(64)),
            dir.to_path_buf(),
            16,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn task_context_reflects_recorded_steps() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let run = Uuid::new_v4();
        store
            .record_step(run, "researcher", "research", "Rust adoption is growing")
            .await
            .unwrap();

        let context = store.task_context(run, "write about rust adoption").await;
        assert!(context.contains("Recent activity"));
        assert!(context.contains("Rust adoption is growing"));
    }

    #[tokio::test]
    async fn finish_run_promotes_flagged_entries_only() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let run = Uuid::new_v4();

        store
            .short_term
            .save(run, "throwaway detail", None, HashMap::new())
            .await
            .unwrap();
        let mut promote = HashMap::new();
        promote.insert("promote".to_string(), Value::Bool(true));
        store
            .short_term
            .save(run, "hard-won insight about retries", None, promote)
            .await
            .unwrap();

        store.finish_run(run, "main_crew", "final answer text", &[]).await.unwrap();

        // Two long-term rows: the promoted entry and the run summary.
        assert_eq!(store.long_term.count().unwrap(), 2);

        // The unpromoted entry is not reachable from a fresh run's search.
        let other_run = Uuid::new_v4();
        let hits = store
            .search(other_run, "throwaway detail", None, 10)
            .await
            .unwrap();
        assert!(hits
            .iter()
            .all(|h| !h["content"].as_str().unwrap_or("").contains("throwaway")));
    }

    #[tokio::test]
    async fn default_search_excludes_short_term() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let run = Uuid::new_v4();
        store
            .record_step(run, "researcher", "research", "short term only fact")
            .await
            .unwrap();

        let hits = store.search(run, "short term fact", None, 10).await.unwrap();
        assert!(hits.is_empty());

        let scoped = store
            .search(run, "short term fact", Some(MemoryKind::Short), 10)
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
    }
}
