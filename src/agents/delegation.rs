//! Delegation requests under the hierarchical process.
//!
//! The manager (or a delegated worker, recursively) emits the reserved
//! `delegate` tool with `{"agent", "task", "context"?}` args. Validation
//! failures are returned to the caller as structured errors rather than
//! failing the run; the caller may rephrase and retry within its own
//! iteration budget.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::agent::Agent;

/// A parsed `delegate` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegationRequest {
    pub agent: String,
    pub task: String,
    pub context: Option<String>,
}

impl DelegationRequest {
    /// Parse the tool args. Missing or empty fields are reported by name.
    pub fn from_args(args: &Value) -> Result<Self, String> {
        let agent = args
            .get("agent")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or("delegation requires a non-empty 'agent' field")?;
        let task = args
            .get("task")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or("delegation requires a non-empty 'task' field")?;
        let context = args
            .get("context")
            .and_then(|v| v.as_str())
            .map(String::from);
        Ok(Self {
            agent: agent.to_string(),
            task: task.to_string(),
            context,
        })
    }
}

/// Check a request against the worker directory and the depth cap.
/// Returns the target agent, or the structured error payload to feed back.
pub fn validate<'a>(
    request: &DelegationRequest,
    directory: &'a HashMap<String, Agent>,
    child_depth: u32,
    max_depth: u32,
) -> Result<&'a Agent, Value> {
    if child_depth > max_depth {
        return Err(json!({
            "error": format!(
                "delegation rejected: depth {} exceeds the maximum of {}",
                child_depth, max_depth
            ),
        }));
    }

    let target = match directory.get(&request.agent) {
        Some(agent) => agent,
        None => {
            let mut known: Vec<&str> = directory.keys().map(String::as_str).collect();
            known.sort();
            return Err(json!({
                "error": format!(
                    "delegation rejected: unknown agent '{}'; available: {}",
                    request.agent,
                    known.join(", ")
                ),
            }));
        }
    };

    if !target.allow_delegation {
        return Err(json!({
            "error": format!(
                "delegation rejected: agent '{}' does not accept delegated work",
                request.agent
            ),
        }));
    }

    Ok(target)
}

/// The delegate entry added to a prompt's tool manifest, listing the
/// workers that can be delegated to.
pub fn manifest_entry(directory: &HashMap<String, Agent>) -> String {
    let mut workers: Vec<String> = directory
        .values()
        .filter(|agent| agent.allow_delegation)
        .map(|agent| format!("{} ({})", agent.name, agent.role))
        .collect();
    workers.sort();
    format!(
        "- delegate: Hand a task to a co-worker and receive its result. \
         args: {{\"agent\": name, \"task\": description, \"context\"?: extra info}}. \
         Co-workers: {}",
        workers.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> HashMap<String, Agent> {
        let mut map = HashMap::new();
        map.insert(
            "research".to_string(),
            Agent::new("research", "Researcher", "find facts", "curious").with_delegation(true),
        );
        map.insert(
            "loner".to_string(),
            Agent::new("loner", "Specialist", "work alone", "solitary"),
        );
        map
    }

    #[test]
    fn parses_well_formed_args() {
        let request = DelegationRequest::from_args(&json!({
            "agent": "research",
            "task": "research X",
            "context": "background",
        }))
        .unwrap();
        assert_eq!(request.agent, "research");
        assert_eq!(request.context.as_deref(), Some("background"));
    }

    #[test]
    fn missing_fields_are_named() {
        let err = DelegationRequest::from_args(&json!({"agent": "research"})).unwrap_err();
        assert!(err.contains("'task'"));
    }

    #[test]
    fn unknown_target_is_structured_error() {
        let directory = directory();
        let request = DelegationRequest {
            agent: "ghost".into(),
            task: "anything".into(),
            context: None,
        };
        let err = validate(&request, &directory, 1, 3).unwrap_err();
        assert!(err["error"].as_str().unwrap().contains("unknown agent"));
    }

    #[test]
    fn non_delegable_target_is_rejected() {
        let directory = directory();
        let request = DelegationRequest {
            agent: "loner".into(),
            task: "anything".into(),
            context: None,
        };
        let err = validate(&request, &directory, 1, 3).unwrap_err();
        assert!(err["error"]
            .as_str()
            .unwrap()
            .contains("does not accept delegated work"));
    }

    #[test]
    fn depth_overflow_is_rejected() {
        let directory = directory();
        let request = DelegationRequest {
            agent: "research".into(),
            task: "anything".into(),
            context: None,
        };
        assert!(validate(&request, &directory, 3, 3).is_ok());
        let err = validate(&request, &directory, 4, 3).unwrap_err();
        assert!(err["error"].as_str().unwrap().contains("depth"));
    }
}
