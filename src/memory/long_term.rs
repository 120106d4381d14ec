//! Long-term memory: durable cross-run records.
//!
//! SQLite is the durable source of truth; every row is also embedded into
//! the vector index so queries are semantic top-k with optional metadata
//! filtering. Written at run end with the final-output summary and
//! distilled per-agent facts.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use uuid::Uuid;

use crate::memory::storage::VectorStorage;
use crate::rag::MetadataFilter;

/// One durable record.
#[derive(Debug, Clone)]
pub struct LongTermRecord {
    pub content: String,
    pub agent: Option<String>,
    pub metadata: HashMap<String, Value>,
    /// Quality score carried from the producing run.
    pub score: f64,
}

pub struct LongTermMemory {
    db_path: PathBuf,
    storage: VectorStorage,
}

impl LongTermMemory {
    pub fn new(db_path: PathBuf, storage: VectorStorage) -> Result<Self, anyhow::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS long_term_memories (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                agent TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL,
                score REAL
            )",
            [],
        )?;
        Ok(Self { db_path, storage })
    }

    /// Persist a record and index its embedding.
    pub async fn save(&self, record: &LongTermRecord) -> Result<String, anyhow::Error> {
        let id = Uuid::new_v4().to_string();
        let metadata_json = serde_json::to_string(&record.metadata)?;
        let created_at = Utc::now().to_rfc3339();

        let db_path = self.db_path.clone();
        let row = (
            id.clone(),
            record.content.clone(),
            record.agent.clone(),
            metadata_json,
            created_at,
            record.score,
        );
        tokio::task::spawn_blocking(move || -> Result<(), anyhow::Error> {
            let conn = Connection::open(&db_path)?;
            conn.execute(
                "INSERT INTO long_term_memories (id, content, agent, metadata, created_at, score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![row.0, row.1, row.2, row.3, row.4, row.5],
            )?;
            Ok(())
        })
        .await??;

        let mut indexed = record.metadata.clone();
        if let Some(agent) = &record.agent {
            indexed.insert("agent".to_string(), Value::String(agent.clone()));
        }
        self.storage
            .save_with_id(&id, &record.content, &indexed)
            .await?;
        Ok(id)
    }

    /// Semantic top-k with an optional metadata equality filter.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Value>, anyhow::Error> {
        self.storage.search_filtered(query, k, 0.0, filter).await
    }

    /// Number of rows persisted.
    pub fn count(&self) -> Result<usize, anyhow::Error> {
        let conn = Connection::open(&self.db_path)?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM long_term_memories", [], |row| {
                row.get(0)
            })?;
        Ok(count as usize)
    }

    /// Drop every row and the indexed embeddings.
    pub async fn reset(&self) -> Result<(), anyhow::Error> {
        let ids: Vec<String> = {
            let conn = Connection::open(&self.db_path)?;
            let mut stmt = conn.prepare("SELECT id FROM long_term_memories")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };
        {
            let conn = Connection::open(&self.db_path)?;
            conn.execute("DELETE FROM long_term_memories", [])?;
        }
        self.storage.delete(&ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use crate::rag::InMemoryVectorIndex;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn memory(dir: &std::path::Path) -> LongTermMemory {
        LongTermMemory::new(
            dir.join("ltm.db"),
            VectorStorage::new(
                "long_term",
                Arc::new(HashEmbedder::new(64)),
                Arc::new(InMemoryVectorIndex::new(64)),
            ),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn save_persists_row_and_embedding() {
        let dir = tempdir().unwrap();
        let memory = memory(dir.path());
        memory
            .save(&LongTermRecord {
                content: "The deploy pipeline needs a staging smoke test".into(),
                agent: Some("ops".into()),
                metadata: HashMap::new(),
                score: 0.8,
            })
            .await
            .unwrap();

        assert_eq!(memory.count().unwrap(), 1);
        let hits = memory
            .search("staging smoke test pipeline", 3, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["metadata"]["agent"], "ops");
    }

    #[tokio::test]
    async fn metadata_filter_scopes_results() {
        let dir = tempdir().unwrap();
        let memory = memory(dir.path());
        for agent in ["research", "writer"] {
            memory
                .save(&LongTermRecord {
                    content: format!("{} agent learned about report formatting", agent),
                    agent: Some(agent.into()),
                    metadata: HashMap::new(),
                    score: 0.5,
                })
                .await
                .unwrap();
        }

        let mut filter = MetadataFilter::new();
        filter.insert("agent".into(), Value::String("writer".into()));
        let hits = memory
            .search("report formatting", 5, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0]["content"].as_str().unwrap().starts_with("writer"));
    }

    #[tokio::test]
    async fn reset_clears_rows_and_index() {
        let dir = tempdir().unwrap();
        let memory = memory(dir.path());
        memory
            .save(&LongTermRecord {
                content: "transient knowledge".into(),
                agent: None,
                metadata: HashMap::new(),
                score: 0.0,
            })
            .await
            .unwrap();
        memory.reset().await.unwrap();
        assert_eq!(memory.count().unwrap(), 0);
        assert!(memory.search("knowledge", 5, None).await.unwrap().is_empty());
    }
}
