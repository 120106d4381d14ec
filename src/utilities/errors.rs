//! Core error types for the okami engine.
//!
//! Every failure kind the orchestrator, memory layer, guardrails, and
//! evolution pipeline can surface is represented here so callers can match
//! on behavior (retryable vs fatal) instead of string contents.

use thiserror::Error;

/// Errors surfaced by the orchestration core.
#[derive(Debug, Error)]
pub enum OkamiError {
    /// Malformed spec, cyclic task graph, or unresolved reference.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The per-agent rate bucket could not grant a token within the wait budget.
    #[error("rate budget exceeded for agent '{agent}' after waiting {waited_ms}ms")]
    RateBudgetExceeded { agent: String, waited_ms: u64 },

    /// Transient completer failure (timeout, reset, 5xx-class). Retried with backoff.
    #[error("completer transient failure: {0}")]
    CompleterTransient(String),

    /// Fatal completer failure (auth, quota, malformed request). Never retried.
    #[error("completer fatal failure: {0}")]
    CompleterFatal(String),

    /// A tool invocation failed. Non-strict tool errors re-enter the agent
    /// loop as observations; strict ones fail the task.
    #[error("tool '{tool}' failed: {message}")]
    Tool {
        tool: String,
        message: String,
        strict: bool,
    },

    /// A guardrail vetoed the output and the retry budget is exhausted.
    #[error("guardrail '{guardrail}' rejected output: {reason}")]
    GuardrailRejected { guardrail: String, reason: String },

    /// The agent ran out of completer iterations before producing an answer.
    #[error("agent '{agent}' exceeded maximum iterations ({max_iter})")]
    MaxIterExceeded { agent: String, max_iter: u32 },

    /// The request's cancellation token fired.
    #[error("Cancelled")]
    Cancelled,

    /// The request or task deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// A knowledge file mutation failed; the file was restored from backup.
    #[error("knowledge write failed for '{path}': {message}")]
    KnowledgeWrite { path: String, message: String },

    /// The bounded request queue is at capacity.
    #[error("request queue is full")]
    QueueFull,

    /// Anything the above kinds do not cover (storage, serialization, ...).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OkamiError {
    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OkamiError::CompleterTransient(_)
                | OkamiError::RateBudgetExceeded { .. }
                | OkamiError::QueueFull
        )
    }

    /// Whether this error terminates the whole run rather than one task.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            OkamiError::Cancelled | OkamiError::DeadlineExceeded | OkamiError::Validation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_displays_bare_word() {
        // API clients locate cancellations by this exact string.
        assert_eq!(OkamiError::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(OkamiError::CompleterTransient("timeout".into()).is_retryable());
        assert!(OkamiError::QueueFull.is_retryable());
        assert!(!OkamiError::CompleterFatal("bad key".into()).is_retryable());
        assert!(!OkamiError::MaxIterExceeded {
            agent: "researcher".into(),
            max_iter: 3
        }
        .is_retryable());
    }
}
