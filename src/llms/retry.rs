//! Backoff policy for transient completer failures.

use std::time::Duration;

use crate::context::RunContext;
use crate::llms::{Completer, CompleterError, CompleterMessage, Completion};
use crate::utilities::errors::OkamiError;

/// Exponential backoff parameters. Defaults: 200ms base, factor 2, 5 tries,
/// ±20% jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max_tries: u32,
    /// Jitter fraction applied symmetrically around the computed delay.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            factor: 2.0,
            max_tries: 5,
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn with_max_tries(max_tries: u32) -> Self {
        Self {
            max_tries: max_tries.max(1),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), jittered
    /// deterministically from the salt so tests are reproducible.
    pub fn delay(&self, attempt: u32, salt: &str) -> Duration {
        let exp = self.base.as_secs_f64() * self.factor.powi(attempt.saturating_sub(1) as i32);
        // Map a hash byte into [-jitter, +jitter].
        let digest = md5::compute(format!("{}:{}", salt, attempt).as_bytes());
        let unit = digest.0[0] as f64 / 255.0;
        let factor = 1.0 + self.jitter * (2.0 * unit - 1.0);
        Duration::from_secs_f64(exp * factor)
    }
}

/// Call the completer, retrying transient failures under the policy.
///
/// Fatal failures and cancellation propagate immediately; exhausting the
/// try budget surfaces the last transient error.
pub async fn call_with_retry(
    completer: &dyn Completer,
    messages: &[CompleterMessage],
    policy: &BackoffPolicy,
    ctx: &RunContext,
    salt: &str,
) -> Result<Completion, OkamiError> {
    let mut last_error = String::new();
    for attempt in 1..=policy.max_tries {
        ctx.check()?;
        match completer.complete(messages).await {
            Ok(completion) => return Ok(completion),
            Err(CompleterError::Fatal(message)) => {
                return Err(OkamiError::CompleterFatal(message));
            }
            Err(CompleterError::Transient(message)) => {
                log::warn!(
                    "completer transient failure (attempt {}/{}): {}",
                    attempt,
                    policy.max_tries,
                    message
                );
                last_error = message;
                if attempt < policy.max_tries {
                    tokio::time::sleep(policy.delay(attempt, salt)).await;
                }
            }
        }
    }
    Err(OkamiError::CompleterTransient(last_error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llms::providers::ScriptedCompleter;

    #[test]
    fn delay_grows_exponentially_within_jitter() {
        let policy = BackoffPolicy::default();
        let first = policy.delay(1, "agent").as_secs_f64();
        let third = policy.delay(3, "agent").as_secs_f64();
        assert!((0.16..=0.24).contains(&first));
        assert!((0.64..=0.96).contains(&third));
    }

    #[test]
    fn delay_is_deterministic_for_same_salt() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(2, "writer"), policy.delay(2, "writer"));
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let completer = ScriptedCompleter::new(vec!["recovered"]).failing_first(2);
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            ..BackoffPolicy::default()
        };
        let ctx = RunContext::new();
        let completion = call_with_retry(
            &completer,
            &[CompleterMessage::user("hello")],
            &policy,
            &ctx,
            "test",
        )
        .await
        .unwrap();
        assert_eq!(completion.text, "recovered");
    }

    #[tokio::test]
    async fn fatal_failure_is_not_retried() {
        let completer = ScriptedCompleter::fatal("invalid api key");
        let ctx = RunContext::new();
        let err = call_with_retry(
            &completer,
            &[CompleterMessage::user("hello")],
            &BackoffPolicy::default(),
            &ctx,
            "test",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OkamiError::CompleterFatal(_)));
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_transient() {
        let completer = ScriptedCompleter::new(Vec::<&str>::new()).failing_first(10);
        let policy = BackoffPolicy {
            base: Duration::from_millis(1),
            max_tries: 3,
            ..BackoffPolicy::default()
        };
        let ctx = RunContext::new();
        let err = call_with_retry(
            &completer,
            &[CompleterMessage::user("hello")],
            &policy,
            &ctx,
            "test",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OkamiError::CompleterTransient(_)));
    }
}
