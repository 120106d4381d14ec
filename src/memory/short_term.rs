//! Short-term memory: transient, run-scoped recall.
//!
//! Entries live in a bounded ring per run and in the vector index tagged
//! with their `run_id`, so semantic recall never crosses runs. At run end
//! the ring is discarded; entries flagged `promote` are handed back to the
//! caller for long-term persistence.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::memory::storage::VectorStorage;
use crate::rag::MetadataFilter;

/// One short-term entry.
#[derive(Debug, Clone)]
pub struct ShortTermItem {
    pub id: String,
    pub data: String,
    pub agent: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl ShortTermItem {
    /// Whether the entry asked to be promoted to long-term at run end.
    pub fn wants_promotion(&self) -> bool {
        self.metadata
            .get("promote")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

pub struct ShortTermMemory {
    /// Ring capacity per run.
    window: usize,
    rings: parking_lot::Mutex<HashMap<Uuid, VecDeque<ShortTermItem>>>,
    storage: VectorStorage,
}

impl ShortTermMemory {
    pub fn new(window: usize, storage: VectorStorage) -> Self {
        Self {
            window: window.max(1),
            rings: parking_lot::Mutex::new(HashMap::new()),
            storage,
        }
    }

    /// Record an entry for the given run.
    pub async fn save(
        &self,
        run_id: Uuid,
        value: &str,
        agent: Option<&str>,
        metadata: HashMap<String, Value>,
    ) -> Result<(), anyhow::Error> {
        let item = ShortTermItem {
            id: Uuid::new_v4().to_string(),
            data: value.to_string(),
            agent: agent.map(String::from),
            metadata,
            created_at: Utc::now(),
        };

        let mut indexed = item.metadata.clone();
        indexed.insert("run_id".to_string(), Value::String(run_id.to_string()));
        if let Some(agent) = &item.agent {
            indexed.insert("agent".to_string(), Value::String(agent.clone()));
        }
        self.storage
            .save_with_id(&item.id, &item.data, &indexed)
            .await?;

        let evicted = {
            let mut rings = self.rings.lock();
            let ring = rings.entry(run_id).or_default();
            ring.push_back(item);
            if ring.len() > self.window {
                ring.pop_front()
            } else {
                None
            }
        };
        if let Some(evicted) = evicted {
            let _ = self.storage.delete(&[evicted.id]).await;
        }
        Ok(())
    }

    /// The most recent `n` entries for a run, oldest first.
    pub fn recent(&self, run_id: Uuid, n: usize) -> Vec<ShortTermItem> {
        let rings = self.rings.lock();
        match rings.get(&run_id) {
            Some(ring) => ring.iter().rev().take(n).rev().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Semantic top-k over this run's entries only.
    pub async fn search(
        &self,
        run_id: Uuid,
        query: &str,
        k: usize,
    ) -> Result<Vec<Value>, anyhow::Error> {
        let mut filter = MetadataFilter::new();
        filter.insert("run_id".to_string(), Value::String(run_id.to_string()));
        self.storage
            .search_filtered(query, k, 0.0, Some(&filter))
            .await
    }

    /// Drop the run's entries, returning the ones flagged for promotion.
    pub async fn finish_run(&self, run_id: Uuid) -> Vec<ShortTermItem> {
        let ring = self.rings.lock().remove(&run_id).unwrap_or_default();
        let ids: Vec<String> = ring.iter().map(|item| item.id.clone()).collect();
        if let Err(error) = self.storage.delete(&ids).await {
            log::warn!("failed to drop short-term entries for {}: {}", run_id, error);
        }
        ring.into_iter()
            .filter(ShortTermItem::wants_promotion)
            .collect()
    }
}
