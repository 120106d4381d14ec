//! Task definition.
//!
//! Tasks are nodes in a DAG linked by `context` references; each carries a
//! description, an expected-output contract, and optional guardrails and
//! output schema. Definitions are immutable after compilation.

use std::collections::{BTreeSet, HashMap};

use md5_dep::{Digest, Md5};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::interpolate;

/// A unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// Identity key other tasks use in their `context` lists.
    pub name: String,
    pub description: String,
    pub expected_output: String,
    /// Owning agent by name. Required for sequential crews; the manager
    /// resolves assignment when absent in hierarchical ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Names of tasks whose final outputs are injected into this task's
    /// prompt, in order.
    #[serde(default)]
    pub context: Vec<String>,
    /// Guardrails applied to this task's output, by registry name. Empty
    /// means the configured default pipeline.
    #[serde(default)]
    pub guardrail_refs: Vec<String>,
    /// Extra attempts granted when a guardrail rejects.
    #[serde(default)]
    pub max_retries: u32,
    /// Named output schema the raw output must parse against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<String>,
    /// Whether this task may run concurrently with other async tasks once
    /// its dependencies are satisfied.
    #[serde(default)]
    pub async_execution: bool,
    /// Restrict the agent to these tools for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<BTreeSet<String>>,

    #[serde(skip)]
    original_description: Option<String>,
    #[serde(skip)]
    original_expected_output: Option<String>,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            expected_output: expected_output.into(),
            agent: None,
            context: Vec::new(),
            guardrail_refs: Vec::new(),
            max_retries: 0,
            output_schema: None,
            async_execution: false,
            tools: None,
            original_description: None,
            original_expected_output: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_context<I: IntoIterator<Item = S>, S: Into<String>>(mut self, names: I) -> Self {
        self.context = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_guardrails<I: IntoIterator<Item = S>, S: Into<String>>(mut self, refs: I) -> Self {
        self.guardrail_refs = refs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_async_execution(mut self, async_execution: bool) -> Self {
        self.async_execution = async_execution;
        self
    }

    /// The task portion of the prompt: description plus the expected-output
    /// contract.
    pub fn prompt(&self) -> String {
        format!(
            "{}\n\nExpected Output: {}",
            self.description, self.expected_output
        )
    }

    /// Stable fingerprint of the task definition (pre-interpolation).
    pub fn key(&self) -> String {
        let description = self
            .original_description
            .as_deref()
            .unwrap_or(&self.description);
        let expected = self
            .original_expected_output
            .as_deref()
            .unwrap_or(&self.expected_output);
        let mut hasher = Md5::new();
        hasher.update(format!("{}|{}", description, expected).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Substitute `{placeholder}` inputs into the description and expected
    /// output. Idempotent across calls.
    pub fn interpolate_inputs(&mut self, inputs: &HashMap<String, String>) {
        if self.original_description.is_none() {
            self.original_description = Some(self.description.clone());
            self.original_expected_output = Some(self.expected_output.clone());
        }
        if inputs.is_empty() {
            return;
        }
        if let Some(original) = &self.original_description {
            self.description = interpolate(original, inputs);
        }
        if let Some(original) = &self.original_expected_output {
            self.expected_output = interpolate(original, inputs);
        }
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Task(name={})", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_contract() {
        let task = Task::new("research", "Research {topic}", "A bullet list of findings");
        let prompt = task.prompt();
        assert!(prompt.contains("Research {topic}"));
        assert!(prompt.contains("Expected Output: A bullet list"));
    }

    #[test]
    fn key_survives_interpolation() {
        let mut task = Task::new("research", "Research {topic}", "Findings");
        let key = task.key();
        let mut inputs = HashMap::new();
        inputs.insert("topic".to_string(), "embedded Rust".to_string());
        task.interpolate_inputs(&inputs);
        assert_eq!(task.description, "Research embedded Rust");
        assert_eq!(task.key(), key);
    }
}
