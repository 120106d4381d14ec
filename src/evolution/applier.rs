//! Applying evolution changes under the safety envelope.
//!
//! Writes are confined to the knowledge root; anything aimed elsewhere is
//! converted into a proposal (a `proposals_log.json` entry plus an append to
//! the config-suggestions document). A global advisory lock serializes
//! applier runs so two evolution passes never touch the same file
//! concurrently.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::evolution::Change;
use crate::knowledge::{KnowledgeStore, SectionOperation, UpdateKnowledge, WriteOutcome};

/// Document that accumulates demoted configuration suggestions.
const SUGGESTIONS_PATH: &str = "system/config_suggestions.md";
const SUGGESTIONS_SECTION: &str = "## Suggestions";

/// Minimum length of human text for change content to be applied.
const MIN_CONTENT_CHARS: usize = 16;

/// Terminal status of one change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Applied,
    Skipped,
    Failed,
    Proposed,
}

/// Per-change record in the apply report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeOutcome {
    pub change_type: String,
    pub target: String,
    pub status: ChangeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Everything one applier run did.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub outcomes: Vec<ChangeOutcome>,
}

impl ApplyReport {
    pub fn count(&self, status: ChangeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

pub struct ImprovementApplier {
    knowledge: Arc<KnowledgeStore>,
    max_changes: usize,
    run_lock: tokio::sync::Mutex<()>,
}

impl ImprovementApplier {
    pub fn new(knowledge: Arc<KnowledgeStore>, max_changes: usize) -> Self {
        Self {
            knowledge,
            max_changes: max_changes.max(1),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Apply a batch of changes. Never fails as a whole: each change lands
    /// on its own status and the report carries all of them.
    pub async fn apply(&self, changes: Vec<Change>) -> ApplyReport {
        let _guard = self.run_lock.lock().await;
        let mut report = ApplyReport::default();
        let mut applied = 0usize;

        for change in changes {
            let change_type = change.change_type().to_string();
            let target = change.target();

            let outcome = match change {
                Change::Proposed(_) => {
                    self.demote(&change, "change type is not auto-applicable")
                        .await
                }
                Change::AddKnowledge(_) | Change::UpdateKnowledge(_) => {
                    if applied >= self.max_changes {
                        self.demote(&change, "per-run change budget exhausted").await
                    } else if let Some(reason) = content_stub_reason(&change) {
                        ChangeOutcome {
                            change_type: change_type.clone(),
                            target: target.clone(),
                            status: ChangeStatus::Skipped,
                            reason: Some(reason),
                        }
                    } else if !self.targets_knowledge_root(&change) {
                        self.demote(&change, "target path is outside the knowledge root")
                            .await
                    } else {
                        let result = match &change {
                            Change::AddKnowledge(add) => self.knowledge.add(add).await,
                            Change::UpdateKnowledge(update) => {
                                self.knowledge.update(update).await
                            }
                            Change::Proposed(_) => unreachable!(),
                        };
                        match result {
                            Ok(WriteOutcome::Applied { path }) => {
                                applied += 1;
                                ChangeOutcome {
                                    change_type: change_type.clone(),
                                    target: path,
                                    status: ChangeStatus::Applied,
                                    reason: None,
                                }
                            }
                            Ok(WriteOutcome::Skipped { path, reason }) => ChangeOutcome {
                                change_type: change_type.clone(),
                                target: path,
                                status: ChangeStatus::Skipped,
                                reason: Some(reason),
                            },
                            Err(error) => {
                                log::error!(
                                    "change against '{}' failed and was rolled back: {}",
                                    target,
                                    error
                                );
                                ChangeOutcome {
                                    change_type: change_type.clone(),
                                    target: target.clone(),
                                    status: ChangeStatus::Failed,
                                    reason: Some(error.to_string()),
                                }
                            }
                        }
                    }
                }
            };
            report.outcomes.push(outcome);
        }

        log::info!(
            "evolution apply finished: {} applied, {} skipped, {} failed, {} proposed",
            report.count(ChangeStatus::Applied),
            report.count(ChangeStatus::Skipped),
            report.count(ChangeStatus::Failed),
            report.count(ChangeStatus::Proposed),
        );
        report
    }

    fn targets_knowledge_root(&self, change: &Change) -> bool {
        match change {
            // Adds place the file inside the category directory themselves.
            Change::AddKnowledge(_) => true,
            Change::UpdateKnowledge(update) => {
                self.knowledge.resolve_within_root(&update.path).is_some()
            }
            Change::Proposed(_) => false,
        }
    }

    /// Record the change as a proposal and append it to the suggestions
    /// document instead of executing it.
    async fn demote(&self, change: &Change, why: &str) -> ChangeOutcome {
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "change_type": change.change_type(),
            "target": change.target(),
            "payload": change.to_value(),
            "reason": why,
        });
        if let Err(error) = self.knowledge.record_proposal(entry) {
            log::error!("failed to record proposal: {}", error);
        }

        let suggestion = UpdateKnowledge {
            path: SUGGESTIONS_PATH.to_string(),
            section: Some(SUGGESTIONS_SECTION.to_string()),
            content: format!(
                "- [{}] `{}` targeting `{}`: {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                change.change_type(),
                change.target(),
                why
            ),
            operation: SectionOperation::Append,
            reason: why.to_string(),
        };
        if let Err(error) = self.knowledge.update(&suggestion).await {
            log::error!("failed to append config suggestion: {}", error);
        }

        ChangeOutcome {
            change_type: change.change_type().to_string(),
            target: change.target(),
            status: ChangeStatus::Proposed,
            reason: Some(why.to_string()),
        }
    }
}

/// Content that is a bare path or too short to be real knowledge.
fn content_stub_reason(change: &Change) -> Option<String> {
    let content = match change {
        Change::AddKnowledge(add) => add.content.trim(),
        Change::UpdateKnowledge(update) => update.content.trim(),
        Change::Proposed(_) => return None,
    };

    let human_chars = content.chars().filter(|c| c.is_alphanumeric()).count();
    if human_chars < MIN_CONTENT_CHARS {
        return Some("content appears to be a path or stub".to_string());
    }
    let looks_like_path = !content.contains(char::is_whitespace)
        && (content.contains('/') || content.ends_with(".md") || content.ends_with(".yaml"));
    if looks_like_path || content == change.target() {
        return Some("content appears to be a path or stub".to_string());
    }
    None
}
