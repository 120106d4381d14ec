//! Per-request run context: identity, cancellation, deadline.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::utilities::errors::OkamiError;

/// Carried through every suspension point of a run. Cancellation is
/// cooperative: callers invoke [`RunContext::check`] before each completer
/// call, tool call, vector operation, and bucket wait.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        let mut ctx = Self::new();
        ctx.deadline = Some(Instant::now() + timeout);
        ctx
    }

    /// Token handed to callers that want to cancel this run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fail fast if the run was cancelled or its deadline passed.
    pub fn check(&self) -> Result<(), OkamiError> {
        if self.cancel.is_cancelled() {
            return Err(OkamiError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(OkamiError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Time left before the deadline, if one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Derived context for a task: same run identity and token, deadline
    /// clamped to `min(request deadline, task timeout)`.
    pub fn for_task(&self, task_timeout: Duration) -> Self {
        let task_deadline = Instant::now() + task_timeout;
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(task_deadline)),
            None => Some(task_deadline),
        };
        Self {
            run_id: self.run_id,
            cancel: self.cancel.clone(),
            deadline,
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_trips_check() {
        let ctx = RunContext::new();
        assert!(ctx.check().is_ok());
        ctx.cancel();
        assert!(matches!(ctx.check(), Err(OkamiError::Cancelled)));
    }

    #[test]
    fn elapsed_deadline_trips_check() {
        let ctx = RunContext::with_timeout(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(ctx.check(), Err(OkamiError::DeadlineExceeded)));
    }

    #[test]
    fn task_context_clamps_to_request_deadline() {
        let ctx = RunContext::with_timeout(Duration::from_millis(50));
        let task_ctx = ctx.for_task(Duration::from_secs(3600));
        assert!(task_ctx.remaining().unwrap() <= Duration::from_millis(50));
        assert_eq!(task_ctx.run_id, ctx.run_id);
    }
}
