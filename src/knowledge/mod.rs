//! Categorized, section-addressable knowledge corpus.
//!
//! Markdown files under a knowledge root, grouped by category, cataloged in
//! `index.json`, and embedded into the vector index for retrieval-augmented
//! prompting. The store is also the only write target the evolution pipeline
//! is allowed to touch.

pub mod index;
pub mod section;
pub mod store;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use index::{IndexEntry, KnowledgeIndex};
pub use section::SectionOperation;
pub use store::{KnowledgeFilter, KnowledgeHit, KnowledgeStore, WriteOutcome};

/// Category a knowledge record belongs to; doubles as the directory name
/// under the knowledge root.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeCategory {
    Agents,
    Crew,
    System,
    Domain,
    #[default]
    General,
}

impl KnowledgeCategory {
    /// Infer a category from a file path, falling back to `General`.
    pub fn detect_from_path(path: &str) -> Self {
        let lowered = path.to_lowercase();
        if lowered.contains("agents") {
            Self::Agents
        } else if lowered.contains("crew") {
            Self::Crew
        } else if lowered.contains("system") {
            Self::System
        } else if lowered.contains("domain") {
            Self::Domain
        } else {
            Self::General
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agents => "agents",
            Self::Crew => "crew",
            Self::System => "system",
            Self::Domain => "domain",
            Self::General => "general",
        }
    }
}

impl fmt::Display for KnowledgeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KnowledgeCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "agents" => Ok(Self::Agents),
            "crew" => Ok(Self::Crew),
            "system" => Ok(Self::System),
            "domain" => Ok(Self::Domain),
            "general" => Ok(Self::General),
            other => Err(format!("unknown knowledge category: {}", other)),
        }
    }
}

/// Create a new knowledge record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddKnowledge {
    #[serde(default)]
    pub category: KnowledgeCategory,
    /// Logical file path; only its file name is used, the category picks
    /// the directory.
    #[serde(rename = "file")]
    pub path: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub reason: String,
}

/// Mutate a file-section of an existing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateKnowledge {
    #[serde(rename = "file")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub content: String,
    #[serde(default)]
    pub operation: SectionOperation,
    #[serde(default)]
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_detection_prefers_specific_over_general() {
        assert_eq!(
            KnowledgeCategory::detect_from_path("knowledge/agents/x.md"),
            KnowledgeCategory::Agents
        );
        assert_eq!(
            KnowledgeCategory::detect_from_path("knowledge/misc/notes.md"),
            KnowledgeCategory::General
        );
    }

    #[test]
    fn add_knowledge_uses_wire_field_names() {
        let json = serde_json::json!({
            "category": "agents",
            "file": "knowledge/agents/x.md",
            "title": "X guidance",
            "content": "Always cite sources.",
            "tags": ["x"],
            "reason": "gap",
        });
        let change: AddKnowledge = serde_json::from_value(json).unwrap();
        assert_eq!(change.category, KnowledgeCategory::Agents);
        assert_eq!(change.path, "knowledge/agents/x.md");
    }
}
