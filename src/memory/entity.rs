//! Entity memory: facts keyed by who or what they describe.
//!
//! Writes about the same entity (matched on a normalized name) merge by
//! appending timestamped facts; reads return every fact for the entity.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::memory::storage::VectorStorage;

/// A single dated fact about an entity.
#[derive(Debug, Clone)]
pub struct EntityFact {
    pub recorded_at: DateTime<Utc>,
    pub fact: String,
}

/// Everything known about one entity.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub name: String,
    pub entity_type: String,
    pub facts: Vec<EntityFact>,
}

pub struct EntityMemory {
    records: parking_lot::Mutex<HashMap<String, EntityRecord>>,
    storage: VectorStorage,
}

impl EntityMemory {
    pub fn new(storage: VectorStorage) -> Self {
        Self {
            records: parking_lot::Mutex::new(HashMap::new()),
            storage,
        }
    }

    /// Collapse case and whitespace so "Acme Corp" and " acme  corp " merge.
    fn normalize(name: &str) -> String {
        name.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Record a fact, merging into an existing entity when the normalized
    /// name matches.
    pub async fn save(
        &self,
        name: &str,
        entity_type: &str,
        fact: &str,
    ) -> Result<(), anyhow::Error> {
        let key = Self::normalize(name);
        let document = {
            let mut records = self.records.lock();
            let record = records.entry(key.clone()).or_insert_with(|| EntityRecord {
                name: name.trim().to_string(),
                entity_type: entity_type.to_string(),
                facts: Vec::new(),
            });
            record.facts.push(EntityFact {
                recorded_at: Utc::now(),
                fact: fact.to_string(),
            });
            render_entity(record)
        };

        let mut metadata = HashMap::new();
        metadata.insert("entity_name".to_string(), Value::String(key.clone()));
        metadata.insert(
            "entity_type".to_string(),
            Value::String(entity_type.to_string()),
        );
        self.storage
            .save_with_id(&format!("entity:{}", key), &document, &metadata)
            .await?;
        Ok(())
    }

    /// All facts for the entity, if it is known.
    pub fn get(&self, name: &str) -> Option<EntityRecord> {
        self.records.lock().get(&Self::normalize(name)).cloned()
    }

    /// Semantic search over entity documents.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<Value>, anyhow::Error> {
        self.storage.search_filtered(query, k, 0.0, None).await
    }
}

fn render_entity(record: &EntityRecord) -> String {
    let mut lines = vec![format!("{}({})", record.name, record.entity_type)];
    for fact in &record.facts {
        lines.push(format!(
            "- [{}] {}",
            fact.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            fact.fact
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use crate::rag::InMemoryVectorIndex;
    use std::sync::Arc;

    fn memory() -> EntityMemory {
        EntityMemory::new(VectorStorage::new(
            "entities",
            Arc::new(HashEmbedder::new(64)),
            Arc::new(InMemoryVectorIndex::new(64)),
        ))
    }

    #[tokio::test]
    async fn same_normalized_name_merges_facts() {
        let memory = memory();
        memory
            .save("Acme Corp", "organization", "Ships anvils")
            .await
            .unwrap();
        memory
            .save(" acme  corp ", "organization", "Founded in 1949")
            .await
            .unwrap();

        let record = memory.get("ACME CORP").unwrap();
        assert_eq!(record.facts.len(), 2);
        assert!(record.facts[0].fact.contains("anvils"));
        assert!(record.facts[1].fact.contains("1949"));
    }

    #[tokio::test]
    async fn search_finds_entity_documents() {
        let memory = memory();
        memory
            .save("Acme Corp", "organization", "Ships anvils worldwide")
            .await
            .unwrap();
        let hits = memory.search("anvils worldwide", 3).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["metadata"]["entity_name"], "acme corp");
    }

    #[test]
    fn unknown_entity_reads_none() {
        let memory = memory();
        assert!(memory.get("nobody").is_none());
    }
}
