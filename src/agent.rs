//! Agent definition.
//!
//! An agent is a configured role bound to the completer at run time. The
//! definition is immutable once a crew is compiled; kickoff inputs are
//! interpolated into a working copy, never the original.

use std::collections::{BTreeSet, HashMap};

use md5_dep::{Digest, Md5};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configured worker: identity, prompt templates, tools, iteration bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique instance id.
    pub id: Uuid,
    /// Identity key used by task `agent` references and delegation targets.
    pub name: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,

    /// Custom system prompt template; `{role}`, `{goal}`, `{backstory}`
    /// placeholders are substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_template: Option<String>,
    /// Custom user prompt template; `{input}` is substituted with the
    /// assembled task prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,

    /// Tools this agent may call, by registry name.
    #[serde(default)]
    pub tools: BTreeSet<String>,

    /// Completer iterations allowed per task attempt.
    pub max_iter: u32,
    /// Requests per minute. 0 means unlimited (or the configured default).
    pub max_rpm: u32,
    /// Whether this agent accepts delegated work.
    pub allow_delegation: bool,
    /// Whether memory context is injected into this agent's prompts.
    pub memory: bool,
    /// Knowledge categories injected into this agent's context.
    #[serde(default)]
    pub knowledge_refs: Vec<String>,
    pub verbose: bool,

    #[serde(skip)]
    original_role: Option<String>,
    #[serde(skip)]
    original_goal: Option<String>,
    #[serde(skip)]
    original_backstory: Option<String>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role: role.into(),
            goal: goal.into(),
            backstory: backstory.into(),
            system_template: None,
            prompt_template: None,
            tools: BTreeSet::new(),
            max_iter: 25,
            max_rpm: 0,
            allow_delegation: false,
            memory: true,
            knowledge_refs: Vec::new(),
            verbose: false,
            original_role: None,
            original_goal: None,
            original_backstory: None,
        }
    }

    pub fn with_tools<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tools: I) -> Self {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_iter(mut self, max_iter: u32) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    pub fn with_delegation(mut self, allow: bool) -> Self {
        self.allow_delegation = allow;
        self
    }

    /// Stable fingerprint of the agent definition (pre-interpolation).
    pub fn key(&self) -> String {
        let role = self.original_role.as_deref().unwrap_or(&self.role);
        let goal = self.original_goal.as_deref().unwrap_or(&self.goal);
        let backstory = self.original_backstory.as_deref().unwrap_or(&self.backstory);
        let mut hasher = Md5::new();
        hasher.update(format!("{}|{}|{}", role, goal, backstory).as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Substitute `{placeholder}` inputs into role, goal, and backstory.
    /// Idempotent: re-interpolation always starts from the originals.
    pub fn interpolate_inputs(&mut self, inputs: &HashMap<String, String>) {
        if self.original_role.is_none() {
            self.original_role = Some(self.role.clone());
            self.original_goal = Some(self.goal.clone());
            self.original_backstory = Some(self.backstory.clone());
        }
        if inputs.is_empty() {
            return;
        }
        if let Some(original) = &self.original_role {
            self.role = interpolate(original, inputs);
        }
        if let Some(original) = &self.original_goal {
            self.goal = interpolate(original, inputs);
        }
        if let Some(original) = &self.original_backstory {
            self.backstory = interpolate(original, inputs);
        }
    }

    /// The system prompt for this agent, with the tool manifest appended
    /// when any tools are available.
    pub fn system_prompt(&self, tool_manifest: Option<&str>) -> String {
        let mut prompt = match &self.system_template {
            Some(template) => template
                .replace("{role}", &self.role)
                .replace("{goal}", &self.goal)
                .replace("{backstory}", &self.backstory),
            None => format!(
                "You are {}. {}\n\nYour personal goal is: {}",
                self.role, self.backstory, self.goal
            ),
        };

        if let Some(manifest) = tool_manifest.filter(|m| !m.is_empty()) {
            prompt.push_str(&format!(
                "\n\nYou can use the following tools:\n{}\n\n\
                 To call a tool, reply with ONLY a JSON object of the form\n\
                 {{\"tool\": \"<name>\", \"args\": {{...}}}}\n\
                 The tool result will be returned to you as an observation.\n\
                 When you have the final answer, reply with it as plain text.",
                manifest
            ));
        }
        prompt
    }

    /// The user prompt for this agent given the assembled task input.
    pub fn user_prompt(&self, input: &str) -> String {
        match &self.prompt_template {
            Some(template) => template.replace("{input}", input),
            None => input.to_string(),
        }
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Agent(name={}, role={})", self.name, self.role)
    }
}

pub(crate) fn interpolate(template: &str, inputs: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in inputs {
        result = result.replace(&format!("{{{}}}", key), value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_stable_across_interpolation() {
        let mut agent = Agent::new("researcher", "Researcher on {topic}", "Find facts", "Curious");
        let key_before = agent.key();
        let mut inputs = HashMap::new();
        inputs.insert("topic".to_string(), "Rust".to_string());
        agent.interpolate_inputs(&inputs);
        assert_eq!(agent.role, "Researcher on Rust");
        assert_eq!(agent.key(), key_before);
    }

    #[test]
    fn interpolation_is_idempotent() {
        let mut agent = Agent::new("researcher", "Researcher on {topic}", "goal", "story");
        let mut inputs = HashMap::new();
        inputs.insert("topic".to_string(), "Rust".to_string());
        agent.interpolate_inputs(&inputs);
        inputs.insert("topic".to_string(), "Go".to_string());
        agent.interpolate_inputs(&inputs);
        assert_eq!(agent.role, "Researcher on Go");
    }

    #[test]
    fn system_prompt_includes_tool_protocol_only_with_tools() {
        let agent = Agent::new("a", "Analyst", "Analyze", "Methodical");
        let bare = agent.system_prompt(None);
        assert!(!bare.contains("\"tool\""));

        let with_tools = agent.system_prompt(Some("- search: finds things"));
        assert!(with_tools.contains("- search: finds things"));
        assert!(with_tools.contains("\"tool\""));
    }

    #[test]
    fn custom_templates_substitute_placeholders() {
        let mut agent = Agent::new("a", "Writer", "Write well", "Wordy");
        agent.system_template = Some("ROLE={role} GOAL={goal}".into());
        agent.prompt_template = Some("TASK>>> {input}".into());
        assert_eq!(agent.system_prompt(None), "ROLE=Writer GOAL=Write well");
        assert_eq!(agent.user_prompt("do it"), "TASK>>> do it");
    }
}
