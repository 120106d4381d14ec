//! Crew result aggregation.

use serde::{Deserialize, Serialize};

use crate::tasks::task_output::TaskOutput;
use crate::trace::{ExecutionStep, ExecutionTrace, RunStatus, UsageMetrics};

/// The result of one crew run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrewResult {
    /// The final output: the last passing task's raw output.
    pub raw: String,
    /// Per-task execution artifacts, in completion order.
    pub tasks_output: Vec<ExecutionStep>,
    pub token_usage: UsageMetrics,
    pub trace: ExecutionTrace,
    pub status: RunStatus,
    /// Terminal error when the run did not complete, sufficient to locate
    /// the failure in the trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrewResult {
    /// The user-facing outputs of all tasks that produced one.
    pub fn task_outputs(&self) -> Vec<TaskOutput> {
        self.tasks_output
            .iter()
            .map(|step| {
                TaskOutput::new(
                    &step.task_name,
                    &step.task_name,
                    "",
                    step.raw_output.clone(),
                    None,
                    &step.agent_name,
                )
            })
            .collect()
    }

    /// The terminal error, preferring the run-level one over step errors.
    pub fn terminal_error(&self) -> Option<&str> {
        self.error.as_deref().or_else(|| {
            self.tasks_output
                .iter()
                .rev()
                .find_map(|step| step.error.as_deref())
        })
    }
}
