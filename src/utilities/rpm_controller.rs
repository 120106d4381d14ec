//! Requests-per-minute limiting for completer calls.
//!
//! Each agent gets a token bucket sized by its `max_rpm`. A request either
//! takes a token immediately or waits for the next refill; waiting is capped
//! by the configured budget, after which the call fails with
//! [`OkamiError::RateBudgetExceeded`] (retryable).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::utilities::errors::OkamiError;

/// Token bucket for a single agent.
#[derive(Debug)]
pub struct RpmController {
    /// Maximum requests per minute. 0 means unlimited.
    max_rpm: u32,
    /// Upper bound on how long a single acquire may wait for a token.
    wait_budget: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl RpmController {
    pub fn new(max_rpm: u32, wait_budget: Duration) -> Self {
        Self {
            max_rpm,
            wait_budget,
            state: Mutex::new(BucketState {
                tokens: max_rpm as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting up to the budget for a refill.
    pub async fn acquire(&self, agent: &str) -> Result<(), OkamiError> {
        if self.max_rpm == 0 {
            return Ok(());
        }

        let started = Instant::now();
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                // Seconds until one token accrues at max_rpm per minute.
                Duration::from_secs_f64((1.0 - state.tokens) * 60.0 / self.max_rpm as f64)
            };

            if started.elapsed() + wait > self.wait_budget {
                log::warn!(
                    "agent '{}' exhausted its rate wait budget ({}ms)",
                    agent,
                    self.wait_budget.as_millis()
                );
                return Err(OkamiError::RateBudgetExceeded {
                    agent: agent.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Tokens currently available (after refill).
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let elapsed = state.last_refill.elapsed();
        state.last_refill = Instant::now();
        let replenished = elapsed.as_secs_f64() * self.max_rpm as f64 / 60.0;
        state.tokens = (state.tokens + replenished).min(self.max_rpm as f64);
    }
}

/// Per-agent bucket registry keyed by agent name.
#[derive(Debug, Default)]
pub struct RpmRegistry {
    buckets: Mutex<HashMap<String, Arc<RpmController>>>,
    default_max_rpm: u32,
    wait_budget: Duration,
}

impl RpmRegistry {
    pub fn new(default_max_rpm: u32, wait_budget: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            default_max_rpm,
            wait_budget,
        }
    }

    /// Bucket for the given agent, creating it on first use. `max_rpm = 0`
    /// falls back to the registry default.
    pub fn bucket(&self, agent: &str, max_rpm: u32) -> Arc<RpmController> {
        let effective = if max_rpm == 0 {
            self.default_max_rpm
        } else {
            max_rpm
        };
        let mut buckets = self.buckets.lock();
        buckets
            .entry(agent.to_string())
            .or_insert_with(|| Arc::new(RpmController::new(effective, self.wait_budget)))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unlimited_bucket_never_blocks() {
        let controller = RpmController::new(0, Duration::from_millis(1));
        for _ in 0..100 {
            controller.acquire("researcher").await.unwrap();
        }
    }

    #[tokio::test]
    async fn exhausted_bucket_fails_past_budget() {
        let controller = RpmController::new(2, Duration::from_millis(10));
        controller.acquire("writer").await.unwrap();
        controller.acquire("writer").await.unwrap();

        // Third token would take ~30s to accrue; the 10ms budget cuts it off.
        let err = controller.acquire("writer").await.unwrap_err();
        assert!(matches!(err, OkamiError::RateBudgetExceeded { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn registry_reuses_buckets_per_agent() {
        let registry = RpmRegistry::new(10, Duration::from_millis(100));
        let a = registry.bucket("researcher", 0);
        let b = registry.bucket("researcher", 0);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
