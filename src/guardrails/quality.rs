//! Structural quality checks on task output.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use super::{Guardrail, GuardrailContext, Verdict};

const PLACEHOLDERS: &[&str] = &["TODO", "FIXME", "XXX", "[INSERT", "[PLACEHOLDER]"];

/// Rejects trivially short outputs, unbalanced code fences, prompt echoes,
/// and placeholder text.
#[derive(Debug, Clone)]
pub struct QualityGuardrail {
    /// Minimum output length in characters.
    pub min_chars: usize,
}

impl QualityGuardrail {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    pub fn from_params(params: &HashMap<String, Value>) -> Self {
        let min_chars = params
            .get("min_chars")
            .and_then(|v| v.as_u64())
            .unwrap_or(20) as usize;
        Self::new(min_chars)
    }
}

impl Default for QualityGuardrail {
    fn default() -> Self {
        Self::new(20)
    }
}

#[async_trait]
impl Guardrail for QualityGuardrail {
    fn name(&self) -> &str {
        "quality"
    }

    async fn validate(
        &self,
        output: &str,
        ctx: &GuardrailContext,
    ) -> Result<Verdict, anyhow::Error> {
        let trimmed = output.trim();

        if trimmed.chars().count() < self.min_chars {
            return Ok(Verdict::fail(
                "quality",
                &format!("output is shorter than {} characters", self.min_chars),
            )
            .with_detail("length", Value::from(trimmed.chars().count())));
        }

        if trimmed.matches("```").count() % 2 != 0 {
            return Ok(Verdict::fail("quality", "output has an unterminated code fence"));
        }

        if !ctx.input.is_empty() && trimmed == ctx.input.trim() {
            return Ok(Verdict::fail("quality", "output merely echoes the input"));
        }

        let upper = trimmed.to_uppercase();
        for placeholder in PLACEHOLDERS {
            if upper.contains(placeholder) {
                return Ok(Verdict::fail(
                    "quality",
                    &format!("output contains placeholder text: {}", placeholder),
                ));
            }
        }

        Ok(Verdict::pass("quality"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> GuardrailContext {
        GuardrailContext {
            task_description: "summarize".into(),
            expected_output: "a summary".into(),
            input: "please summarize the report".into(),
        }
    }

    #[tokio::test]
    async fn short_output_rejected() {
        let guardrail = QualityGuardrail::default();
        let verdict = guardrail.validate("ok", &ctx()).await.unwrap();
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn unbalanced_fence_rejected() {
        let guardrail = QualityGuardrail::default();
        let verdict = guardrail
            .validate("Here is the code:\n```rust\nfn main() {}", &ctx())
            .await
            .unwrap();
        assert!(!verdict.passed);
        assert!(verdict.reason.unwrap().contains("code fence"));
    }

    #[tokio::test]
    async fn echo_rejected() {
        let guardrail = QualityGuardrail::default();
        let verdict = guardrail
            .validate("please summarize the report", &ctx())
            .await
            .unwrap();
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn placeholder_rejected() {
        let guardrail = QualityGuardrail::default();
        let verdict = guardrail
            .validate("The report shows growth. TODO: fill in the numbers.", &ctx())
            .await
            .unwrap();
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn reasonable_output_passes() {
        let guardrail = QualityGuardrail::default();
        let verdict = guardrail
            .validate(
                "The report shows steady quarterly growth across all regions.",
                &ctx(),
            )
            .await
            .unwrap();
        assert!(verdict.passed);
    }
}
