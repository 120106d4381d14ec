//! Factual grounding check.
//!
//! Scores the output by lexical overlap with the task's keywords and, when a
//! knowledge store is attached, by how many claim sentences have a grounding
//! hit in the corpus. Outputs scoring below the threshold are rejected.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::knowledge::KnowledgeStore;

use super::{Guardrail, GuardrailContext, Verdict};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "about", "your", "their", "what",
    "which", "will", "should", "must", "have", "has", "been", "are", "was", "were", "when", "then",
    "than", "them", "they", "you", "all", "any", "each", "can", "may", "its", "his", "her", "our",
];

/// Minimum knowledge hit score for a sentence to count as grounded.
const GROUNDING_SCORE_FLOOR: f32 = 0.35;

pub struct HallucinationGuardrail {
    pub threshold: f64,
    knowledge: Option<Arc<KnowledgeStore>>,
}

impl HallucinationGuardrail {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            knowledge: None,
        }
    }

    pub fn from_params(params: &HashMap<String, Value>) -> Self {
        let threshold = params
            .get("threshold")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.7);
        Self::new(threshold)
    }

    /// Attach a knowledge store for claim grounding.
    pub fn with_knowledge(mut self, knowledge: Arc<KnowledgeStore>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    fn keywords(text: &str) -> HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
            .filter(|w| w.len() >= 4 && !STOPWORDS.contains(w))
            .map(String::from)
            .collect()
    }

    fn lexical_overlap(task: &str, output: &str) -> f64 {
        let task_keywords = Self::keywords(task);
        if task_keywords.is_empty() {
            return 1.0;
        }
        let output_keywords = Self::keywords(output);
        let matched = task_keywords
            .iter()
            .filter(|k| output_keywords.contains(*k))
            .count();
        matched as f64 / task_keywords.len() as f64
    }

    /// Fraction of claim sentences with at least one corpus hit.
    async fn grounding_ratio(&self, output: &str) -> Option<f64> {
        let knowledge = self.knowledge.as_ref()?;
        let sentences: Vec<&str> = output
            .split(['.', '!', '?', '\n'])
            .map(str::trim)
            .filter(|s| s.len() >= 24)
            .collect();
        if sentences.is_empty() {
            return None;
        }

        let mut grounded = 0usize;
        for sentence in &sentences {
            match knowledge.search(sentence, 1, None).await {
                Ok(hits) => {
                    if hits.iter().any(|h| h.score >= GROUNDING_SCORE_FLOOR) {
                        grounded += 1;
                    }
                }
                Err(error) => {
                    log::warn!("grounding lookup failed: {}", error);
                    return None;
                }
            }
        }
        Some(grounded as f64 / sentences.len() as f64)
    }
}

#[async_trait]
impl Guardrail for HallucinationGuardrail {
    fn name(&self) -> &str {
        "hallucination"
    }

    async fn validate(
        &self,
        output: &str,
        ctx: &GuardrailContext,
    ) -> Result<Verdict, anyhow::Error> {
        let overlap = Self::lexical_overlap(&ctx.task_description, output);
        let grounding = self.grounding_ratio(output).await;

        let score = match grounding {
            Some(ratio) => 0.5 * overlap + 0.5 * ratio,
            None => overlap,
        };

        let mut verdict = if score < self.threshold {
            Verdict::fail(
                "hallucination",
                &format!(
                    "grounding score {:.2} is below the {:.2} threshold",
                    score, self.threshold
                ),
            )
        } else {
            Verdict::pass_with_score("hallucination", score)
        };
        verdict = verdict.with_detail("lexical_overlap", Value::from(overlap));
        if let Some(ratio) = grounding {
            verdict = verdict.with_detail("grounding_ratio", Value::from(ratio));
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(description: &str) -> GuardrailContext {
        GuardrailContext {
            task_description: description.into(),
            ..GuardrailContext::default()
        }
    }

    #[tokio::test]
    async fn overlapping_output_passes() {
        let guardrail = HallucinationGuardrail::new(0.5);
        let verdict = guardrail
            .validate(
                "Tokio provides async runtime scheduling for Rust applications",
                &ctx("describe the tokio runtime scheduling model"),
            )
            .await
            .unwrap();
        assert!(verdict.passed, "reason: {:?}", verdict.reason);
        assert!(verdict.details.contains_key("lexical_overlap"));
    }

    #[tokio::test]
    async fn unrelated_output_rejected() {
        let guardrail = HallucinationGuardrail::new(0.7);
        let verdict = guardrail
            .validate(
                "Bread rises because yeast ferments sugar",
                &ctx("describe the tokio runtime scheduling model"),
            )
            .await
            .unwrap();
        assert!(!verdict.passed);
    }

    #[tokio::test]
    async fn empty_keyword_task_passes_vacuously() {
        let guardrail = HallucinationGuardrail::new(0.7);
        let verdict = guardrail
            .validate("some answer body that is long enough", &ctx("do it"))
            .await
            .unwrap();
        assert!(verdict.passed);
    }
}
