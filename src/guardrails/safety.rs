//! Safety screening over task output.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::{Guardrail, GuardrailContext, Verdict};

/// Pattern sources compiled at construction. Prohibited matches fail the
/// check; sensitive-topic matches only annotate the verdict.
pub struct SafetyGuardrail {
    prohibited: Vec<(Regex, String)>,
    sensitive: Vec<(Regex, String)>,
    strict: bool,
}

impl SafetyGuardrail {
    pub fn new(
        prohibited: Vec<(String, String)>,
        sensitive: Vec<(String, String)>,
        strict: bool,
    ) -> Self {
        let compile = |patterns: Vec<(String, String)>| {
            patterns
                .into_iter()
                .filter_map(|(pattern, label)| match Regex::new(&pattern) {
                    Ok(regex) => Some((regex, label)),
                    Err(error) => {
                        log::warn!("skipping invalid safety pattern '{}': {}", pattern, error);
                        None
                    }
                })
                .collect()
        };
        Self {
            prohibited: compile(prohibited),
            sensitive: compile(sensitive),
            strict,
        }
    }

    pub fn from_params(params: &HashMap<String, Value>) -> Self {
        let read_patterns = |key: &str| -> Vec<(String, String)> {
            params
                .get(key)
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| {
                            let pattern = item.get("pattern")?.as_str()?.to_string();
                            let label = item
                                .get("label")
                                .and_then(|l| l.as_str())
                                .unwrap_or("configured pattern")
                                .to_string();
                            Some((pattern, label))
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        let mut prohibited = read_patterns("prohibited");
        if prohibited.is_empty() {
            prohibited = Self::default_prohibited();
        }
        let sensitive = read_patterns("sensitive");
        let strict = params
            .get("strict")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Self::new(prohibited, sensitive, strict)
    }

    /// Built-in screen: exposed credentials, PII shapes, destructive shell.
    fn default_prohibited() -> Vec<(String, String)> {
        vec![
            (
                r"(?i)(?:password|api_key|secret|token)\s*[:=]\s*\S+".to_string(),
                "exposed credential".to_string(),
            ),
            (
                r"\b\d{3}-\d{2}-\d{4}\b".to_string(),
                "SSN pattern".to_string(),
            ),
            (
                r"rm\s+-rf\s+/".to_string(),
                "destructive shell command".to_string(),
            ),
        ]
    }
}

impl Default for SafetyGuardrail {
    fn default() -> Self {
        Self::new(Self::default_prohibited(), Vec::new(), false)
    }
}

#[async_trait]
impl Guardrail for SafetyGuardrail {
    fn name(&self) -> &str {
        "safety"
    }

    fn strict(&self) -> bool {
        self.strict
    }

    async fn validate(
        &self,
        output: &str,
        _ctx: &GuardrailContext,
    ) -> Result<Verdict, anyhow::Error> {
        for (regex, label) in &self.prohibited {
            if regex.is_match(output) {
                return Ok(Verdict::fail(
                    "safety",
                    &format!("output matches prohibited pattern: {}", label),
                ));
            }
        }

        let warnings: Vec<Value> = self
            .sensitive
            .iter()
            .filter(|(regex, _)| regex.is_match(output))
            .map(|(_, label)| Value::String(label.clone()))
            .collect();

        let mut verdict = Verdict::pass("safety");
        if !warnings.is_empty() {
            verdict = verdict.with_detail("warnings", Value::Array(warnings));
        }
        Ok(verdict)
    }
}
