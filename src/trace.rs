//! Execution traces.
//!
//! A trace is the append-only record of one crew run: every tool call,
//! attempt count, guardrail verdict, and error, sufficient to reconstruct
//! what happened without re-running anything. The orchestrator is the only
//! writer; the trace is frozen when the run ends.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::guardrails::Verdict;

/// Aggregated completer token accounting for a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub successful_requests: u64,
}

impl UsageMetrics {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Fold another usage record into this one.
    pub fn absorb(&mut self, other: &UsageMetrics) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.successful_requests += other.successful_requests;
    }
}

/// One tool invocation made by an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub args: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Terminal verdict for a task after all attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalVerdict {
    Pass,
    Fail,
}

/// Per-task execution artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub task_name: String,
    pub agent_name: String,
    /// Attempts consumed, including the first one.
    pub attempts: u32,
    pub tool_calls: Vec<ToolCall>,
    pub raw_output: String,
    pub guardrail_verdicts: Vec<Verdict>,
    pub final_verdict: FinalVerdict,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal status of a crew run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
    Partial,
}

/// The full record of one crew run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub crew_name: String,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub inputs: HashMap<String, String>,
    pub steps: Vec<ExecutionStep>,
    pub final_output: String,
    pub status: RunStatus,
}

impl ExecutionTrace {
    /// Open a trace at run start.
    pub fn begin(crew_name: &str, run_id: Uuid, inputs: HashMap<String, String>) -> Self {
        Self {
            crew_name: crew_name.to_string(),
            run_id,
            started_at: Utc::now(),
            ended_at: None,
            inputs,
            steps: Vec::new(),
            final_output: String::new(),
            status: RunStatus::Partial,
        }
    }

    /// Append one task's artifact.
    pub fn record_step(&mut self, step: ExecutionStep) {
        self.steps.push(step);
    }

    /// Freeze the trace with the terminal status and final output.
    pub fn finish(&mut self, status: RunStatus, final_output: String) {
        self.status = status;
        self.final_output = final_output;
        self.ended_at = Some(Utc::now());
    }

    /// Compacted per-step view used as evolution input: agent, duration,
    /// guardrail outcome, and error excerpt per task.
    pub fn summary(&self) -> String {
        let mut lines = Vec::with_capacity(self.steps.len() + 1);
        lines.push(format!(
            "crew={} run={} status={:?} steps={}",
            self.crew_name,
            self.run_id,
            self.status,
            self.steps.len()
        ));
        for step in &self.steps {
            let rejected = step
                .guardrail_verdicts
                .iter()
                .filter(|v| !v.passed)
                .count();
            let mut line = format!(
                "- task '{}' by '{}': attempts={} verdict={:?} duration={}ms rejections={}",
                step.task_name,
                step.agent_name,
                step.attempts,
                step.final_verdict,
                step.duration_ms,
                rejected
            );
            if let Some(error) = &step.error {
                let excerpt: String = error.chars().take(160).collect();
                line.push_str(&format!(" error={}", excerpt));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_lifecycle_records_and_freezes() {
        let mut trace = ExecutionTrace::begin("main_crew", Uuid::new_v4(), HashMap::new());
        assert_eq!(trace.status, RunStatus::Partial);

        trace.record_step(ExecutionStep {
            task_name: "research".into(),
            agent_name: "researcher".into(),
            attempts: 1,
            tool_calls: Vec::new(),
            raw_output: "42".into(),
            guardrail_verdicts: Vec::new(),
            final_verdict: FinalVerdict::Pass,
            duration_ms: 12,
            error: None,
        });
        trace.finish(RunStatus::Completed, "42".into());

        assert_eq!(trace.status, RunStatus::Completed);
        assert!(trace.ended_at.is_some());
        assert_eq!(trace.steps.len(), 1);
    }

    #[test]
    fn summary_includes_errors_and_rejections() {
        let mut trace = ExecutionTrace::begin("main_crew", Uuid::new_v4(), HashMap::new());
        trace.record_step(ExecutionStep {
            task_name: "analyze".into(),
            agent_name: "analyst".into(),
            attempts: 3,
            tool_calls: Vec::new(),
            raw_output: String::new(),
            guardrail_verdicts: vec![Verdict::fail("relevance", "off topic")],
            final_verdict: FinalVerdict::Fail,
            duration_ms: 80,
            error: Some("guardrail 'relevance' rejected output: off topic".into()),
        });

        let summary = trace.summary();
        assert!(summary.contains("task 'analyze'"));
        assert!(summary.contains("rejections=1"));
        assert!(summary.contains("error="));
    }

    #[test]
    fn usage_metrics_absorb_sums() {
        let mut total = UsageMetrics::default();
        total.absorb(&UsageMetrics {
            prompt_tokens: 10,
            completion_tokens: 5,
            successful_requests: 1,
        });
        total.absorb(&UsageMetrics {
            prompt_tokens: 7,
            completion_tokens: 3,
            successful_requests: 1,
        });
        assert_eq!(total.total_tokens(), 25);
        assert_eq!(total.successful_requests, 2);
    }
}
