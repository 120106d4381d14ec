//! The `index.json` catalog of the knowledge corpus.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::knowledge::KnowledgeCategory;

/// One catalog entry, keyed by the record id (the file's path relative to
/// the knowledge root).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: String,
    pub category: KnowledgeCategory,
    pub title: String,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// On-disk catalog: id → entry, plus the last catalog write time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeIndex {
    #[serde(default)]
    pub files: BTreeMap<String, IndexEntry>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl KnowledgeIndex {
    /// Load the catalog from `<root>/index.json`, or start empty.
    pub fn load(root: &Path) -> Self {
        let path = root.join("index.json");
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(index) => index,
                Err(error) => {
                    log::warn!("index.json is unreadable, starting fresh: {}", error);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Persist the catalog to `<root>/index.json`.
    pub fn save(&mut self, root: &Path) -> Result<(), anyhow::Error> {
        self.last_updated = Some(Utc::now());
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::create_dir_all(root)?;
        std::fs::write(root.join("index.json"), raw)?;
        Ok(())
    }

    /// Insert a new entry or refresh an existing one's `updated_at`.
    pub fn upsert(
        &mut self,
        id: &str,
        category: KnowledgeCategory,
        title: &str,
        tags: &BTreeSet<String>,
    ) {
        let now = Utc::now();
        match self.files.get_mut(id) {
            Some(entry) => {
                entry.updated_at = now;
                if !title.is_empty() {
                    entry.title = title.to_string();
                }
                entry.tags.extend(tags.iter().cloned());
            }
            None => {
                self.files.insert(
                    id.to_string(),
                    IndexEntry {
                        path: id.to_string(),
                        category,
                        title: title.to_string(),
                        tags: tags.clone(),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
    }

    /// Entry count per category, for status reporting.
    pub fn category_counts(&self) -> BTreeMap<KnowledgeCategory, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.files.values() {
            *counts.entry(entry.category).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempdir().unwrap();
        let mut index = KnowledgeIndex::default();
        index.upsert(
            "agents/researcher.md",
            KnowledgeCategory::Agents,
            "Researcher guidance",
            &BTreeSet::from(["research".to_string()]),
        );
        index.save(dir.path()).unwrap();

        let loaded = KnowledgeIndex::load(dir.path());
        assert_eq!(loaded.files.len(), 1);
        let entry = &loaded.files["agents/researcher.md"];
        assert_eq!(entry.category, KnowledgeCategory::Agents);
        assert!(entry.tags.contains("research"));
    }

    #[test]
    fn upsert_refreshes_updated_at_only() {
        let mut index = KnowledgeIndex::default();
        index.upsert(
            "general/notes.md",
            KnowledgeCategory::General,
            "Notes",
            &BTreeSet::new(),
        );
        let created = index.files["general/notes.md"].created_at;
        index.upsert(
            "general/notes.md",
            KnowledgeCategory::General,
            "Notes",
            &BTreeSet::from(["extra".to_string()]),
        );
        let entry = &index.files["general/notes.md"];
        assert_eq!(entry.created_at, created);
        assert!(entry.updated_at >= created);
        assert!(entry.tags.contains("extra"));
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let index = KnowledgeIndex::load(dir.path());
        assert!(index.files.is_empty());
    }
}
