//! PolicyEvaluator - runs every enabled policy against a request.
//!
//! Each predicate runs as its own task under its own timeout, so a slow
//! one cannot hold up the rest. A predicate that errors, panics or
//! overruns its budget yields a non-matching result for that policy; the
//! failure is logged and counted, never returned to the caller.
//!
//! A synchronous predicate finishes inside a single poll and cannot be
//! preempted, so the elapsed time is checked again once it returns.

use crate::context::RequestContext;
use crate::error::GovernanceError;
use crate::policy::{PolicyDefinition, PolicyResult};
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default per-policy evaluation budget.
pub const DEFAULT_EVALUATION_TIMEOUT: Duration = Duration::from_millis(50);

/// Evaluates a policy set against a request context.
#[derive(Debug)]
pub struct PolicyEvaluator {
    timeout: Duration,
    failures: AtomicU64,
}

impl Default for PolicyEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_EVALUATION_TIMEOUT)
    }
}

impl PolicyEvaluator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            failures: AtomicU64::new(0),
        }
    }

    /// Number of predicate failures (errors, panics, timeouts) seen so far.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Evaluate every enabled policy, returning results in policy order.
    ///
    /// Disabled policies produce no result. Severity resolution between
    /// multiple matches is left to the enforcement engine.
    pub async fn evaluate(
        &self,
        context: &RequestContext,
        policies: &[PolicyDefinition],
    ) -> Vec<PolicyResult> {
        let pending = policies
            .iter()
            .filter(|policy| policy.enabled)
            .map(|policy| self.evaluate_one(context, policy));

        join_all(pending).await
    }

    async fn evaluate_one(&self, context: &RequestContext, policy: &PolicyDefinition) -> PolicyResult {
        let predicate = Arc::clone(&policy.predicate);
        let owned = context.clone();
        let started = tokio::time::Instant::now();
        let mut handle = tokio::spawn(async move { predicate.evaluate(&owned).await });

        let failure = match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(_)) if started.elapsed() > self.timeout => GovernanceError::PolicyTimeout(self.timeout),
            Ok(Ok(Ok(outcome))) => {
                return if outcome.matched {
                    PolicyResult::matched(&policy.name, policy.action, outcome.reason)
                } else {
                    PolicyResult::unmatched(&policy.name, policy.action, outcome.reason)
                };
            }
            Ok(Ok(Err(err))) => err,
            Ok(Err(join)) if join.is_panic() => GovernanceError::PolicyEvaluation("predicate panicked".to_string()),
            Ok(Err(join)) => GovernanceError::PolicyEvaluation(join.to_string()),
            Err(_elapsed) => {
                handle.abort();
                GovernanceError::PolicyTimeout(self.timeout)
            }
        };

        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            policy = %policy.name,
            client_ip = %context.client_ip(),
            error = %failure,
            "policy evaluation failed, treating as no match"
        );

        PolicyResult::unmatched(&policy.name, policy.action, failure.to_string())
    }
}
