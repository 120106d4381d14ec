//! Semantic relevance check between task description and output.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::embedder::{cosine_similarity, Embedder};

use super::{Guardrail, GuardrailContext, Verdict};

/// Embeds the task description and the output; rejects when the cosine
/// similarity falls below the threshold. Embedding failures are fail-open.
pub struct RelevanceGuardrail {
    pub min_relevance: f64,
    embedder: Arc<dyn Embedder>,
}

impl RelevanceGuardrail {
    pub fn new(min_relevance: f64, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            min_relevance,
            embedder,
        }
    }

    pub fn from_params(params: &HashMap<String, Value>, embedder: Arc<dyn Embedder>) -> Self {
        let min_relevance = params
            .get("min_relevance")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5);
        Self::new(min_relevance, embedder)
    }
}

#[async_trait]
impl Guardrail for RelevanceGuardrail {
    fn name(&self) -> &str {
        "relevance"
    }

    async fn validate(
        &self,
        output: &str,
        ctx: &GuardrailContext,
    ) -> Result<Verdict, anyhow::Error> {
        let task_vector = match self.embedder.embed(&ctx.task_description).await {
            Ok(v) => v,
            Err(error) => {
                log::warn!("relevance guardrail could not embed task: {}", error);
                return Ok(Verdict::pass("relevance")
                    .with_detail("embed_error", Value::String(error.to_string())));
            }
        };
        let output_vector = match self.embedder.embed(output).await {
            Ok(v) => v,
            Err(error) => {
                log::warn!("relevance guardrail could not embed output: {}", error);
                return Ok(Verdict::pass("relevance")
                    .with_detail("embed_error", Value::String(error.to_string())));
            }
        };

        let cosine = cosine_similarity(&task_vector, &output_vector) as f64;
        if cosine < self.min_relevance {
            return Ok(Verdict::fail(
                "relevance",
                &format!(
                    "output relevance {:.2} is below the {:.2} threshold",
                    cosine, self.min_relevance
                ),
            )
            .with_detail("cosine", Value::from(cosine)));
        }

        Ok(Verdict::pass_with_score("relevance", cosine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        fn dimension(&self) -> usize {
            8
        }
        async fn embed(&self, _: &str) -> Result<Vec<f32>, anyhow::Error> {
            anyhow::bail!("embedding service unavailable")
        }
    }

    fn ctx(description: &str) -> GuardrailContext {
        GuardrailContext {
            task_description: description.into(),
            ..GuardrailContext::default()
        }
    }

    #[tokio::test]
    async fn on_topic_output_passes() {
        let guardrail = RelevanceGuardrail::new(0.3, Arc::new(HashEmbedder::default()));
        let verdict = guardrail
            .validate(
                "Rust memory safety comes from ownership and borrowing rules",
                &ctx("explain rust memory safety and ownership"),
            )
            .await
            .unwrap();
        assert!(verdict.passed, "reason: {:?}", verdict.reason);
    }

    #[tokio::test]
    async fn off_topic_output_rejected() {
        let guardrail = RelevanceGuardrail::new(0.5, Arc::new(HashEmbedder::default()));
        let verdict = guardrail
            .validate(
                "Preheat the oven and whisk the eggs gently",
                &ctx("explain rust memory safety and ownership"),
            )
            .await
            .unwrap();
        assert!(!verdict.passed);
        assert!(verdict.details.contains_key("cosine"));
    }

    #[tokio::test]
    async fn embed_failure_is_fail_open() {
        let guardrail = RelevanceGuardrail::new(0.5, Arc::new(BrokenEmbedder));
        let verdict = guardrail
            .validate("anything", &ctx("anything else"))
            .await
            .unwrap();
        assert!(verdict.passed);
        assert!(verdict.details.contains_key("embed_error"));
    }
}
