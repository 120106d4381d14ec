//! Output guardrails.
//!
//! A guardrail is a predicate over a task's candidate output. Guardrails are
//! ordered into a pipeline that short-circuits on the first failure; the
//! failing verdict is turned into a corrective hint for the retry prompt.
//! A guardrail that errors internally is fail-open (logged, treated as a
//! pass) unless it declares itself strict.

pub mod hallucination;
pub mod quality;
pub mod relevance;
pub mod safety;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::GuardrailEntry;
use crate::embedder::Embedder;
use crate::utilities::errors::OkamiError;

pub use hallucination::HallucinationGuardrail;
pub use quality::QualityGuardrail;
pub use relevance::RelevanceGuardrail;
pub use safety::SafetyGuardrail;

/// Outcome of one guardrail evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub details: HashMap<String, Value>,
    /// Which guardrail produced this verdict.
    #[serde(default)]
    pub guardrail: String,
}

impl Verdict {
    pub fn pass(guardrail: &str) -> Self {
        Self {
            passed: true,
            score: None,
            reason: None,
            details: HashMap::new(),
            guardrail: guardrail.to_string(),
        }
    }

    pub fn pass_with_score(guardrail: &str, score: f64) -> Self {
        Self {
            score: Some(score),
            ..Self::pass(guardrail)
        }
    }

    pub fn fail(guardrail: &str, reason: &str) -> Self {
        Self {
            passed: false,
            score: None,
            reason: Some(reason.to_string()),
            details: HashMap::new(),
            guardrail: guardrail.to_string(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }

    /// Render this failing verdict as the corrective instruction appended
    /// to the agent's retry prompt.
    pub fn corrective_hint(&self) -> String {
        let mut hint = format!(
            "Your previous answer was rejected by the '{}' check: {}",
            self.guardrail,
            self.reason.as_deref().unwrap_or("no reason given")
        );
        if !self.details.is_empty() {
            if let Ok(details) = serde_json::to_string(&self.details) {
                hint.push_str("\nDetails: ");
                hint.push_str(&details);
            }
        }
        hint.push_str("\nRevise your answer so it satisfies the expected output.");
        hint
    }
}

/// Context handed to guardrails alongside the candidate output.
#[derive(Debug, Clone, Default)]
pub struct GuardrailContext {
    pub task_description: String,
    pub expected_output: String,
    /// The prompt input the output must not simply echo.
    pub input: String,
}

/// A single output check.
#[async_trait]
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;

    /// Strict guardrails fail closed on internal errors.
    fn strict(&self) -> bool {
        false
    }

    async fn validate(
        &self,
        output: &str,
        ctx: &GuardrailContext,
    ) -> Result<Verdict, anyhow::Error>;
}

/// Ordered pipeline with short-circuit semantics.
#[derive(Default)]
pub struct GuardrailPipeline {
    guardrails: Vec<Arc<dyn Guardrail>>,
}

impl std::fmt::Debug for GuardrailPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardrailPipeline")
            .field("guardrails", &self.guardrails.len())
            .finish()
    }
}

impl GuardrailPipeline {
    pub fn new(guardrails: Vec<Arc<dyn Guardrail>>) -> Self {
        Self { guardrails }
    }

    pub fn is_empty(&self) -> bool {
        self.guardrails.is_empty()
    }

    /// Run every guardrail in order. Returns all verdicts produced; the last
    /// one is the failure if the pipeline rejected.
    pub async fn validate(&self, output: &str, ctx: &GuardrailContext) -> Vec<Verdict> {
        let mut verdicts = Vec::with_capacity(self.guardrails.len());
        for guardrail in &self.guardrails {
            match guardrail.validate(output, ctx).await {
                Ok(verdict) => {
                    let rejected = !verdict.passed;
                    verdicts.push(verdict);
                    if rejected {
                        break;
                    }
                }
                Err(error) => {
                    if guardrail.strict() {
                        log::error!(
                            "strict guardrail '{}' errored, failing closed: {}",
                            guardrail.name(),
                            error
                        );
                        verdicts.push(Verdict::fail(
                            guardrail.name(),
                            &format!("internal error: {}", error),
                        ));
                        break;
                    }
                    log::warn!(
                        "guardrail '{}' errored, failing open: {}",
                        guardrail.name(),
                        error
                    );
                    verdicts.push(
                        Verdict::pass(guardrail.name())
                            .with_detail("error", Value::String(error.to_string())),
                    );
                }
            }
        }
        verdicts
    }
}

/// Named guardrails resolvable from task `guardrail_refs`.
#[derive(Default)]
pub struct GuardrailRegistry {
    guardrails: HashMap<String, Arc<dyn Guardrail>>,
}

impl GuardrailRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, guardrail: Arc<dyn Guardrail>) {
        self.guardrails
            .insert(guardrail.name().to_string(), guardrail);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Guardrail>> {
        self.guardrails.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.guardrails.contains_key(name)
    }

    /// Resolve an ordered ref list into a pipeline.
    pub fn pipeline(&self, refs: &[String]) -> Result<GuardrailPipeline, OkamiError> {
        let mut resolved = Vec::with_capacity(refs.len());
        for name in refs {
            match self.get(name) {
                Some(guardrail) => resolved.push(guardrail),
                None => {
                    return Err(OkamiError::Validation(format!(
                        "unknown guardrail reference '{}'",
                        name
                    )))
                }
            }
        }
        Ok(GuardrailPipeline::new(resolved))
    }

    /// Build a registry from configuration entries, wiring in the embedder
    /// where a check needs one.
    pub fn from_config(entries: &[GuardrailEntry], embedder: Arc<dyn Embedder>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            match entry.kind.as_str() {
                "quality" => registry.register(Arc::new(QualityGuardrail::from_params(&entry.params))),
                "relevance" => registry.register(Arc::new(RelevanceGuardrail::from_params(
                    &entry.params,
                    embedder.clone(),
                ))),
                "safety" => registry.register(Arc::new(SafetyGuardrail::from_params(&entry.params))),
                "hallucination" => registry.register(Arc::new(
                    HallucinationGuardrail::from_params(&entry.params),
                )),
                other => log::warn!("ignoring unknown guardrail type '{}'", other),
            }
        }
        registry
    }

    /// Names of configured guardrails, for validation and status reporting.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.guardrails.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFail;

    #[async_trait]
    impl Guardrail for AlwaysFail {
        fn name(&self) -> &str {
            "always_fail"
        }
        async fn validate(&self, _: &str, _: &GuardrailContext) -> Result<Verdict, anyhow::Error> {
            Ok(Verdict::fail("always_fail", "nope"))
        }
    }

    struct Erroring {
        strict: bool,
    }

    #[async_trait]
    impl Guardrail for Erroring {
        fn name(&self) -> &str {
            "erroring"
        }
        fn strict(&self) -> bool {
            self.strict
        }
        async fn validate(&self, _: &str, _: &GuardrailContext) -> Result<Verdict, anyhow::Error> {
            anyhow::bail!("boom")
        }
    }

    struct AlwaysPass;

    #[async_trait]
    impl Guardrail for AlwaysPass {
        fn name(&self) -> &str {
            "always_pass"
        }
        async fn validate(&self, _: &str, _: &GuardrailContext) -> Result<Verdict, anyhow::Error> {
            Ok(Verdict::pass("always_pass"))
        }
    }

    #[tokio::test]
    async fn pipeline_short_circuits_on_first_failure() {
        let pipeline =
            GuardrailPipeline::new(vec![Arc::new(AlwaysFail), Arc::new(AlwaysPass)]);
        let verdicts = pipeline.validate("out", &GuardrailContext::default()).await;
        assert_eq!(verdicts.len(), 1);
        assert!(!verdicts[0].passed);
    }

    #[tokio::test]
    async fn non_strict_error_fails_open() {
        let pipeline = GuardrailPipeline::new(vec![
            Arc::new(Erroring { strict: false }),
            Arc::new(AlwaysPass),
        ]);
        let verdicts = pipeline.validate("out", &GuardrailContext::default()).await;
        assert_eq!(verdicts.len(), 2);
        assert!(verdicts.iter().all(|v| v.passed));
    }

    #[tokio::test]
    async fn strict_error_fails_closed() {
        let pipeline = GuardrailPipeline::new(vec![
            Arc::new(Erroring { strict: true }),
            Arc::new(AlwaysPass),
        ]);
        let verdicts = pipeline.validate("out", &GuardrailContext::default()).await;
        assert_eq!(verdicts.len(), 1);
        assert!(!verdicts[0].passed);
    }

    #[test]
    fn corrective_hint_carries_reason_and_details() {
        let verdict = Verdict::fail("relevance", "cosine below threshold")
            .with_detail("cosine", Value::from(0.31));
        let hint = verdict.corrective_hint();
        assert!(hint.contains("relevance"));
        assert!(hint.contains("cosine below threshold"));
        assert!(hint.contains("0.31"));
    }

    #[test]
    fn unknown_ref_is_a_validation_error() {
        let registry = GuardrailRegistry::new();
        let err = registry.pipeline(&["ghost".to_string()]).unwrap_err();
        assert!(matches!(err, OkamiError::Validation(_)));
    }
}
