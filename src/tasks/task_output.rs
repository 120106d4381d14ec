//! The user-facing result of one task.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Final result of a task after its execution, as handed to dependent
/// tasks and aggregated into the crew result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutput {
    pub name: String,
    pub description: String,
    pub expected_output: String,
    /// First words of the description, for logs and listings.
    pub summary: String,
    /// The raw text the agent produced.
    pub raw: String,
    /// Parsed form when the task declared an output schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_dict: Option<Value>,
    /// Name of the agent that produced it.
    pub agent: String,
}

impl TaskOutput {
    pub fn new(
        name: &str,
        description: &str,
        expected_output: &str,
        raw: String,
        json_dict: Option<Value>,
        agent: &str,
    ) -> Self {
        let summary = description
            .split_whitespace()
            .take(10)
            .collect::<Vec<_>>()
            .join(" ")
            + "...";
        Self {
            name: name.to_string(),
            description: description.to_string(),
            expected_output: expected_output.to_string(),
            summary,
            raw,
            json_dict,
            agent: agent.to_string(),
        }
    }
}

impl std::fmt::Display for TaskOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_is_bounded() {
        let output = TaskOutput::new(
            "t",
            "one two three four five six seven eight nine ten eleven twelve",
            "expected",
            "raw".into(),
            None,
            "agent",
        );
        assert!(output.summary.ends_with("..."));
        assert!(!output.summary.contains("eleven"));
    }
}
