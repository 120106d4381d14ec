//! The knowledge store.
//!
//! Files live under `<root>/<category>/<slug>.md` with `index.json` and
//! `proposals_log.json` beside them; backups go to a sibling `backups/`
//! directory named by timestamp. Every mutation is backup-first: a file is
//! never observably modified unless a copy of its prior content exists, and
//! any failure restores the backup byte-for-byte.

use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::embedder::Embedder;
use crate::knowledge::index::KnowledgeIndex;
use crate::knowledge::section::{
    append_to_section, insert_after_section, replace_section, SectionOperation,
};
use crate::knowledge::{AddKnowledge, KnowledgeCategory, UpdateKnowledge};
use crate::rag::{MetadataFilter, VectorIndex, VectorRecord};
use crate::utilities::errors::OkamiError;

/// Result of a store write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied { path: String },
    Skipped { path: String, reason: String },
}

impl WriteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied { .. })
    }
}

/// Constraint on a knowledge search.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeFilter {
    pub category: Option<KnowledgeCategory>,
    pub tags: BTreeSet<String>,
}

/// One retrieval result.
#[derive(Debug, Clone)]
pub struct KnowledgeHit {
    pub id: String,
    pub category: KnowledgeCategory,
    pub score: f32,
    pub content: String,
}

pub struct KnowledgeStore {
    root: PathBuf,
    backup_root: PathBuf,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    catalog: parking_lot::Mutex<KnowledgeIndex>,
    file_locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    dedup_threshold: f64,
}

impl KnowledgeStore {
    /// Open (or initialize) a store rooted at `root`. Backups go to a
    /// `backups/` directory beside the root.
    pub fn open(
        root: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self, anyhow::Error> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let backup_root = match root.parent() {
            Some(parent) if parent != Path::new("") => parent.join("backups"),
            _ => PathBuf::from("backups"),
        };
        std::fs::create_dir_all(&backup_root)?;
        let catalog = KnowledgeIndex::load(&root);

        Ok(Self {
            root,
            backup_root,
            embedder,
            index,
            catalog: parking_lot::Mutex::new(catalog),
            file_locks: parking_lot::Mutex::new(HashMap::new()),
            dedup_threshold: 0.92,
        })
    }

    /// Override the duplicate-detection cosine threshold.
    pub fn with_dedup_threshold(mut self, threshold: f64) -> Self {
        self.dedup_threshold = threshold;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Resolve a logical path to a location inside the root. Returns `None`
    /// for absolute paths, parent traversal, or anything else that would
    /// escape the knowledge root.
    pub fn resolve_within_root(&self, logical: &str) -> Option<PathBuf> {
        let candidate = Path::new(logical);
        if candidate.is_absolute() {
            return None;
        }
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return None;
        }

        // Accept both "knowledge/agents/x.md" and "agents/x.md".
        let root_name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().to_string());
        let parts: Vec<String> = candidate
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        let skip_first = matches!(
            (parts.first(), root_name.as_ref()),
            (Some(first), Some(root)) if first == root
        );
        let rest = if skip_first { &parts[1..] } else { &parts[..] };
        if rest.is_empty() {
            return None;
        }

        let mut resolved = self.root.clone();
        for part in rest {
            resolved.push(part);
        }
        Some(resolved)
    }

    /// Embed every markdown file under the root into the vector index.
    pub async fn reindex_existing(&self) -> Result<usize, anyhow::Error> {
        let mut count = 0usize;
        let mut files = Vec::new();
        for category in [
            KnowledgeCategory::Agents,
            KnowledgeCategory::Crew,
            KnowledgeCategory::System,
            KnowledgeCategory::Domain,
            KnowledgeCategory::General,
        ] {
            let dir = self.root.join(category.as_str());
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "md") {
                    files.push((category, path));
                }
            }
        }

        for (category, path) in files {
            let content = std::fs::read_to_string(&path)?;
            let id = self.record_id(&path);
            self.upsert_embedding(&id, category, &content, &BTreeSet::new())
                .await?;
            count += 1;
        }
        log::info!("indexed {} knowledge files from {:?}", count, self.root);
        Ok(count)
    }

    /// Top-k semantic search over the corpus.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&KnowledgeFilter>,
    ) -> Result<Vec<KnowledgeHit>, anyhow::Error> {
        let vector = self.embedder.embed(query).await?;
        let metadata_filter = filter.and_then(|f| {
            f.category.map(|category| {
                let mut m = MetadataFilter::new();
                m.insert("category".into(), Value::String(category.to_string()));
                m
            })
        });

        let hits = self
            .index
            .query(&vector, k.max(1), metadata_filter.as_ref())
            .await?;

        let wanted_tags: Option<&BTreeSet<String>> =
            filter.map(|f| &f.tags).filter(|t| !t.is_empty());

        Ok(hits
            .into_iter()
            .filter(|hit| match wanted_tags {
                Some(tags) => {
                    let hit_tags: BTreeSet<String> = hit
                        .metadata
                        .get("tags")
                        .and_then(|v| v.as_array())
                        .map(|a| {
                            a.iter()
                                .filter_map(|t| t.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default();
                    tags.iter().all(|t| hit_tags.contains(t))
                }
                None => true,
            })
            .map(|hit| KnowledgeHit {
                category: hit
                    .metadata
                    .get("category")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default(),
                id: hit.id,
                score: hit.score,
                content: hit.document,
            })
            .collect())
    }

    /// Create a new record. A record whose content is near-identical
    /// (cosine ≥ threshold) to an existing one in the same category is
    /// skipped as a duplicate, leaving the store unchanged.
    pub async fn add(&self, change: &AddKnowledge) -> Result<WriteOutcome, OkamiError> {
        let file_name = Path::new(&change.path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| OkamiError::KnowledgeWrite {
                path: change.path.clone(),
                message: "change has no file name".into(),
            })?;
        let target = self.root.join(change.category.as_str()).join(&file_name);
        let id = self.record_id(&target);

        if target.exists() {
            let existing = std::fs::read_to_string(&target).unwrap_or_default();
            if existing
                .to_lowercase()
                .contains(&change.content.trim().to_lowercase())
            {
                return Ok(WriteOutcome::Skipped {
                    path: id,
                    reason: "duplicate: file already carries this content".into(),
                });
            }
        }

        // Semantic dedup within the category.
        let vector = self
            .embedder
            .embed(&change.content)
            .await
            .map_err(|e| self.write_error(&id, e))?;
        let mut filter = MetadataFilter::new();
        filter.insert(
            "category".into(),
            Value::String(change.category.to_string()),
        );
        let near = self
            .index
            .query(&vector, 1, Some(&filter))
            .await
            .map_err(|e| self.write_error(&id, e))?;
        if let Some(top) = near.first() {
            if f64::from(top.score) >= self.dedup_threshold {
                log::info!(
                    "skipping duplicate knowledge '{}' (cosine {:.3} vs '{}')",
                    id,
                    top.score,
                    top.id
                );
                return Ok(WriteOutcome::Skipped {
                    path: id,
                    reason: format!("duplicate of '{}'", top.id),
                });
            }
        }

        let lock = self.lock_for(&id);
        let _guard = lock.lock().await;

        let document = render_record(&change.title, &change.content, &change.tags);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.write_error(&id, e.into()))?;
        }
        std::fs::write(&target, &document).map_err(|e| self.write_error(&id, e.into()))?;

        // Verify post-state before indexing.
        let written =
            std::fs::read_to_string(&target).map_err(|e| self.write_error(&id, e.into()))?;
        if !written.contains(change.content.trim()) {
            let _ = std::fs::remove_file(&target);
            return Err(OkamiError::KnowledgeWrite {
                path: id,
                message: "post-write verification failed".into(),
            });
        }

        if let Err(error) = self
            .upsert_embedding(&id, change.category, &written, &change.tags)
            .await
        {
            let _ = std::fs::remove_file(&target);
            return Err(self.write_error(&id, error));
        }

        {
            let mut catalog = self.catalog.lock();
            catalog.upsert(&id, change.category, &change.title, &change.tags);
            if let Err(error) = catalog.save(&self.root) {
                log::warn!("failed to persist index.json: {}", error);
            }
        }

        log::info!("created knowledge file '{}'", id);
        Ok(WriteOutcome::Applied { path: id })
    }

    /// Mutate a file-section. The prior content is backed up first; any
    /// failure after that point restores the backup and reports
    /// `KnowledgeWrite`. A missing target file is created instead.
    pub async fn update(&self, change: &UpdateKnowledge) -> Result<WriteOutcome, OkamiError> {
        let target = self
            .resolve_within_root(&change.path)
            .ok_or_else(|| OkamiError::KnowledgeWrite {
                path: change.path.clone(),
                message: "path escapes the knowledge root".into(),
            })?;

        if !target.exists() {
            // Nothing to mutate yet; treat as a creation.
            let title = change
                .section
                .as_deref()
                .map(|s| s.trim_start_matches('#').trim().to_string())
                .unwrap_or_else(|| "Knowledge Update".to_string());
            let add = AddKnowledge {
                category: KnowledgeCategory::detect_from_path(&change.path),
                path: change.path.clone(),
                title,
                content: change.content.clone(),
                tags: BTreeSet::new(),
                reason: change.reason.clone(),
            };
            return self.add(&add).await;
        }

        let id = self.record_id(&target);
        let lock = self.lock_for(&id);
        let _guard = lock.lock().await;

        let current =
            std::fs::read_to_string(&target).map_err(|e| self.write_error(&id, e.into()))?;
        let backup = self
            .write_backup(&id, &current)
            .map_err(|e| self.write_error(&id, e))?;

        let updated = match change.operation {
            SectionOperation::Append => {
                append_to_section(&current, change.section.as_deref(), &change.content)
            }
            SectionOperation::Replace => {
                replace_section(&current, change.section.as_deref(), &change.content)
            }
            SectionOperation::Insert => {
                insert_after_section(&current, change.section.as_deref(), &change.content)
            }
        };

        if let Err(error) = std::fs::write(&target, &updated) {
            self.restore_backup(&backup, &target);
            return Err(self.write_error(&id, error.into()));
        }

        let written = match std::fs::read_to_string(&target) {
            Ok(written) if written.contains(change.content.trim()) => written,
            Ok(_) | Err(_) => {
                self.restore_backup(&backup, &target);
                return Err(OkamiError::KnowledgeWrite {
                    path: id,
                    message: "post-write verification failed".into(),
                });
            }
        };

        let category = KnowledgeCategory::detect_from_path(&id);
        if let Err(error) = self
            .upsert_embedding(&id, category, &written, &BTreeSet::new())
            .await
        {
            self.restore_backup(&backup, &target);
            return Err(self.write_error(&id, error));
        }

        {
            let mut catalog = self.catalog.lock();
            catalog.upsert(&id, category, "", &BTreeSet::new());
            if let Err(error) = catalog.save(&self.root) {
                log::warn!("failed to persist index.json: {}", error);
            }
        }

        log::info!(
            "updated knowledge file '{}' ({:?} on section {:?})",
            id,
            change.operation,
            change.section
        );
        Ok(WriteOutcome::Applied { path: id })
    }

    /// Append an entry to `proposals_log.json`.
    pub fn record_proposal(&self, entry: Value) -> Result<(), anyhow::Error> {
        let path = self.root.join("proposals_log.json");
        let mut entries: Vec<Value> = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        entries.push(entry);
        std::fs::write(&path, serde_json::to_string_pretty(&entries)?)?;
        Ok(())
    }

    /// All recorded proposals.
    pub fn proposals(&self) -> Vec<Value> {
        let path = self.root.join("proposals_log.json");
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    /// File count per category.
    pub fn stats(&self) -> HashMap<String, usize> {
        let catalog = self.catalog.lock();
        catalog
            .category_counts()
            .into_iter()
            .map(|(category, count)| (category.to_string(), count))
            .collect()
    }

    fn record_id(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.file_locks.lock();
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn upsert_embedding(
        &self,
        id: &str,
        category: KnowledgeCategory,
        document: &str,
        tags: &BTreeSet<String>,
    ) -> Result<(), anyhow::Error> {
        let vector = self.embedder.embed(document).await?;
        let mut metadata = HashMap::new();
        metadata.insert("category".to_string(), Value::String(category.to_string()));
        metadata.insert("path".to_string(), Value::String(id.to_string()));
        if !tags.is_empty() {
            metadata.insert(
                "tags".to_string(),
                Value::Array(tags.iter().cloned().map(Value::String).collect()),
            );
        }
        self.index
            .upsert(vec![VectorRecord {
                id: id.to_string(),
                vector,
                metadata,
                document: document.to_string(),
            }])
            .await
    }

    fn write_backup(&self, id: &str, content: &str) -> Result<PathBuf, anyhow::Error> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let backup_path = self.backup_root.join(stamp).join(id);
        if let Some(parent) = backup_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&backup_path, content)?;
        Ok(backup_path)
    }

    fn restore_backup(&self, backup: &Path, target: &Path) {
        match std::fs::copy(backup, target) {
            Ok(_) => log::warn!("restored {:?} from backup {:?}", target, backup),
            Err(error) => log::error!(
                "failed to restore {:?} from backup {:?}: {}",
                target,
                backup,
                error
            ),
        }
    }

    fn write_error(&self, id: &str, error: anyhow::Error) -> OkamiError {
        OkamiError::KnowledgeWrite {
            path: id.to_string(),
            message: error.to_string(),
        }
    }
}

fn render_record(title: &str, content: &str, tags: &BTreeSet<String>) -> String {
    let tags_line = if tags.is_empty() {
        "None".to_string()
    } else {
        tags.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    format!(
        "# {}\n\n**Created**: {}  \n**Tags**: {}\n\n---\n\n{}\n",
        title,
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
        tags_line,
        content.trim()
    )
}
