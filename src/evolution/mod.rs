//! The self-evolution pipeline.
//!
//! After a primary crew run, an evolution crew inspects the execution trace
//! and proposes changes. Only knowledge writes are ever applied; every other
//! change type is demoted to a recorded proposal for human review.

pub mod applier;
pub mod coordinator;
pub mod parser;

use serde_json::{json, Value};

use crate::knowledge::{AddKnowledge, UpdateKnowledge};

pub use applier::{ApplyReport, ChangeOutcome, ChangeStatus, ImprovementApplier};
pub use coordinator::{EvolutionCoordinator, EvolutionMetrics};
pub use parser::{ImprovementParser, ParsedChanges};

/// A change proposed by the evolution crew.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    AddKnowledge(AddKnowledge),
    UpdateKnowledge(UpdateKnowledge),
    /// Any other change type (agent parameters, new agents, configuration).
    /// Never applied; recorded as a proposal.
    Proposed(ProposedChange),
}

/// A change the pipeline refuses to execute automatically.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedChange {
    /// The wire `type` of the original entry.
    pub change_type: String,
    /// Whatever target the entry named, when one was present.
    pub target_path: Option<String>,
    /// The original entry, verbatim.
    pub payload: Value,
    pub reason: String,
}

impl Change {
    /// Parse one entry of the evolution `changes` array.
    pub fn from_value(value: &Value) -> Result<Change, String> {
        let object = value
            .as_object()
            .ok_or("change entry must be a JSON object")?;
        let change_type = object
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or("change entry has no 'type' field")?;

        match change_type {
            "add_knowledge" => {
                let change: AddKnowledge = serde_json::from_value(value.clone())
                    .map_err(|e| format!("malformed add_knowledge entry: {}", e))?;
                if change.content.trim().is_empty() {
                    return Err("add_knowledge entry has empty content".to_string());
                }
                Ok(Change::AddKnowledge(change))
            }
            "update_knowledge" => {
                let change: UpdateKnowledge = serde_json::from_value(value.clone())
                    .map_err(|e| format!("malformed update_knowledge entry: {}", e))?;
                if change.content.trim().is_empty() {
                    return Err("update_knowledge entry has empty content".to_string());
                }
                Ok(Change::UpdateKnowledge(change))
            }
            other => Ok(Change::Proposed(ProposedChange {
                change_type: other.to_string(),
                target_path: object
                    .get("target_path")
                    .or_else(|| object.get("file"))
                    .and_then(|v| v.as_str())
                    .map(String::from),
                payload: value.clone(),
                reason: object
                    .get("reason")
                    .and_then(|r| r.as_str())
                    .unwrap_or_default()
                    .to_string(),
            })),
        }
    }

    /// Serialize back to the wire shape.
    pub fn to_value(&self) -> Value {
        match self {
            Change::AddKnowledge(change) => {
                let mut value = serde_json::to_value(change).unwrap_or(Value::Null);
                if let Some(object) = value.as_object_mut() {
                    object.insert("type".into(), json!("add_knowledge"));
                }
                value
            }
            Change::UpdateKnowledge(change) => {
                let mut value = serde_json::to_value(change).unwrap_or(Value::Null);
                if let Some(object) = value.as_object_mut() {
                    object.insert("type".into(), json!("update_knowledge"));
                }
                value
            }
            Change::Proposed(proposed) => proposed.payload.clone(),
        }
    }

    /// The wire `type` of this change.
    pub fn change_type(&self) -> &str {
        match self {
            Change::AddKnowledge(_) => "add_knowledge",
            Change::UpdateKnowledge(_) => "update_knowledge",
            Change::Proposed(proposed) => &proposed.change_type,
        }
    }

    /// The path this change targets, as named on the wire.
    pub fn target(&self) -> String {
        match self {
            Change::AddKnowledge(change) => change.path.clone(),
            Change::UpdateKnowledge(change) => change.path.clone(),
            Change::Proposed(proposed) => proposed.target_path.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::SectionOperation;

    #[test]
    fn parses_and_round_trips_add_knowledge() {
        let wire = json!({
            "type": "add_knowledge",
            "category": "agents",
            "file": "knowledge/agents/x.md",
            "title": "X guidance on Y",
            "content": "When handling topic Y, start from the glossary.",
            "tags": ["x", "y"],
            "reason": "gap",
        });
        let change = Change::from_value(&wire).unwrap();
        assert!(matches!(change, Change::AddKnowledge(_)));

        let back = change.to_value();
        assert_eq!(back["type"], "add_knowledge");
        assert_eq!(back["file"], "knowledge/agents/x.md");
        assert_eq!(Change::from_value(&back).unwrap(), change);
    }

    #[test]
    fn parses_update_with_default_operation() {
        let wire = json!({
            "type": "update_knowledge",
            "file": "knowledge/general/notes.md",
            "content": "An extra paragraph.",
            "operation": "append",
            "reason": "amendment",
        });
        match Change::from_value(&wire).unwrap() {
            Change::UpdateKnowledge(change) => {
                assert_eq!(change.operation, SectionOperation::Append);
                assert!(change.section.is_none());
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn unknown_type_becomes_proposed() {
        let wire = json!({
            "type": "update_agent_parameter",
            "agent": "research",
            "parameter": "max_iter",
            "value": 50,
            "reason": "agent keeps hitting the iteration cap",
        });
        match Change::from_value(&wire).unwrap() {
            Change::Proposed(proposed) => {
                assert_eq!(proposed.change_type, "update_agent_parameter");
                assert_eq!(proposed.payload, wire);
            }
            other => panic!("expected proposed, got {:?}", other),
        }
    }

    #[test]
    fn missing_content_is_malformed() {
        let wire = json!({"type": "add_knowledge", "file": "x.md", "title": "t", "content": ""});
        assert!(Change::from_value(&wire).is_err());
    }
}
