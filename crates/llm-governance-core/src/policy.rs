//! Policy types and the pluggable predicate interface.

use crate::context::RequestContext;
use crate::error::GovernanceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Action a policy can request, ordered by severity (`Allow < Alert < Block`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    Allow,
    Alert,
    Block,
}

impl PolicyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Allow => "allow",
            PolicyAction::Alert => "alert",
            PolicyAction::Block => "block",
        }
    }

    /// Parse the stored lowercase form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(PolicyAction::Allow),
            "alert" => Some(PolicyAction::Alert),
            "block" => Some(PolicyAction::Block),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single predicate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyMatch {
    pub matched: bool,
    pub reason: String,
}

impl PolicyMatch {
    /// The predicate matched the request.
    pub fn hit(reason: impl Into<String>) -> Self {
        Self {
            matched: true,
            reason: reason.into(),
        }
    }

    /// The predicate did not match.
    pub fn miss() -> Self {
        Self {
            matched: false,
            reason: String::new(),
        }
    }
}

/// Predicate capability evaluated against each request.
///
/// Implement this trait to plug a rule language into the governance core.
/// Evaluation runs under a bounded timeout; an error, a panic or a timeout
/// counts as "no match" for that policy only.
#[async_trait]
pub trait Evaluable: Send + Sync {
    async fn evaluate(&self, context: &RequestContext) -> Result<PolicyMatch, GovernanceError>;
}

type PredicateFn =
    dyn Fn(&RequestContext) -> Result<PolicyMatch, GovernanceError> + Send + Sync + 'static;

/// Native-function predicate, mainly for tests and embedders.
pub struct FnPredicate {
    f: Box<PredicateFn>,
}

impl FnPredicate {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&RequestContext) -> Result<PolicyMatch, GovernanceError> + Send + Sync + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl Evaluable for FnPredicate {
    async fn evaluate(&self, context: &RequestContext) -> Result<PolicyMatch, GovernanceError> {
        (self.f)(context)
    }
}

/// A named policy as loaded from external configuration.
///
/// Policy sets are replaced wholesale on reload; a definition is never
/// mutated in place.
#[derive(Clone)]
pub struct PolicyDefinition {
    pub name: String,
    pub enabled: bool,
    /// Action the policy proposes when it matches.
    pub action: PolicyAction,
    pub predicate: Arc<dyn Evaluable>,
}

impl PolicyDefinition {
    pub fn new(name: impl Into<String>, action: PolicyAction, predicate: Arc<dyn Evaluable>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            action,
            predicate,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl fmt::Debug for PolicyDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyDefinition")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("action", &self.action)
            .finish_non_exhaustive()
    }
}

/// Result of evaluating one policy against one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyResult {
    pub policy_name: String,
    pub matched: bool,
    pub proposed_action: PolicyAction,
    pub reason: String,
}

impl PolicyResult {
    /// A matching result proposing `action`.
    pub fn matched(
        policy_name: impl Into<String>,
        action: PolicyAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            policy_name: policy_name.into(),
            matched: true,
            proposed_action: action,
            reason: reason.into(),
        }
    }

    /// A non-matching result.
    pub fn unmatched(
        policy_name: impl Into<String>,
        action: PolicyAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            policy_name: policy_name.into(),
            matched: false,
            proposed_action: action,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn test_action_severity_order() {
        assert!(PolicyAction::Block > PolicyAction::Alert);
        assert!(PolicyAction::Alert > PolicyAction::Allow);
        assert_eq!(
            [PolicyAction::Alert, PolicyAction::Block, PolicyAction::Allow]
                .into_iter()
                .max(),
            Some(PolicyAction::Block)
        );
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(PolicyAction::parse("block"), Some(PolicyAction::Block));
        assert_eq!(PolicyAction::parse("BLOCK"), None);
        assert_eq!(PolicyAction::Alert.to_string(), "alert");
    }

    #[test]
    fn test_action_serde() {
        let json = serde_json::to_string(&PolicyAction::Block).unwrap();
        assert_eq!(json, "\"block\"");
        let action: PolicyAction = serde_json::from_str("\"allow\"").unwrap();
        assert_eq!(action, PolicyAction::Allow);
    }

    #[tokio::test]
    async fn test_fn_predicate() {
        let predicate = FnPredicate::new(|ctx| {
            if ctx.hour() >= 21 {
                Ok(PolicyMatch::hit("after bedtime"))
            } else {
                Ok(PolicyMatch::miss())
            }
        });
        let late = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 8, 22, 0, 0)
            .unwrap();
        let ctx = RequestContext::new("10.0.0.2", "api.openai.com", late);

        let result = predicate.evaluate(&ctx).await.unwrap();
        assert!(result.matched);
        assert_eq!(result.reason, "after bedtime");
    }
}
