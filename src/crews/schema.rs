//! Output schema registry.
//!
//! A schema names the top-level keys a task's JSON output must carry.
//! Schemas are registered at startup; compile-time validation rejects tasks
//! referencing unknown names, and a runtime parse failure consumes a retry
//! exactly like a guardrail rejection.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shape contract for a task's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSchema {
    pub name: String,
    pub required_keys: Vec<String>,
}

impl OutputSchema {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(name: &str, required_keys: I) -> Self {
        Self {
            name: name.to_string(),
            required_keys: required_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse the raw output as a JSON object and check required keys.
    /// The payload may arrive inside a fenced code block.
    pub fn validate(&self, raw: &str) -> Result<Value, String> {
        let body = strip_fences(raw);
        let value: Value = serde_json::from_str(body.trim())
            .map_err(|e| format!("output is not valid JSON: {}", e))?;
        let object = value
            .as_object()
            .ok_or_else(|| "output must be a JSON object".to_string())?;
        for key in &self.required_keys {
            if !object.contains_key(key) {
                return Err(format!("output is missing required key '{}'", key));
            }
        }
        Ok(value)
    }
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim();
        }
    }
    trimmed
}

/// Named schemas resolvable from task `output_schema` references.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, OutputSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: OutputSchema) {
        self.schemas.insert(schema.name.clone(), schema);
    }

    pub fn get(&self, name: &str) -> Option<&OutputSchema> {
        self.schemas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_required_keys() {
        let schema = OutputSchema::new("report", ["title", "body"]);
        assert!(schema
            .validate(r#"{"title": "T", "body": "B"}"#)
            .is_ok());
        let err = schema.validate(r#"{"title": "T"}"#).unwrap_err();
        assert!(err.contains("body"));
    }

    #[test]
    fn rejects_non_object_payloads() {
        let schema = OutputSchema::new("report", ["title"]);
        assert!(schema.validate("[1, 2, 3]").is_err());
        assert!(schema.validate("not json at all").is_err());
    }

    #[test]
    fn accepts_fenced_payloads() {
        let schema = OutputSchema::new("report", ["title"]);
        let raw = "```json\n{\"title\": \"T\"}\n```";
        assert!(schema.validate(raw).is_ok());
    }
}
