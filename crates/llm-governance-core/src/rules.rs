//! Declarative rule predicates.
//!
//! A [`RuleSpec`] is compiled once into a [`RulePredicate`], one concrete
//! [`Evaluable`]. Every configured condition must hold for a match; an empty
//! rule is rejected at compile time.

use crate::context::RequestContext;
use crate::error::GovernanceError;
use crate::policy::{Evaluable, PolicyAction, PolicyDefinition, PolicyMatch};
use crate::time_exception::parse_weekday;
use async_trait::async_trait;
use chrono::Weekday;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Hour-of-day window, `start` inclusive and `end` exclusive.
///
/// `start > end` wraps midnight: `{start: 21, end: 7}` covers 21:00-06:59.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            self.start <= hour && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Conditions of a declarative rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSpec {
    pub hours: Option<HourWindow>,
    /// Day names, `monday` through `sunday`.
    pub days: Vec<String>,
    /// Endpoint domains; subdomains match too.
    pub endpoints: Vec<String>,
    /// Case-insensitive regexes, any of which must match the prompt summary.
    pub prompt_patterns: Vec<String>,
    /// Match once a device has made more than this many requests today.
    pub max_requests_per_day: Option<u64>,
}

/// A named rule as it appears in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_alert")]
    pub action: PolicyAction,
    #[serde(flatten)]
    pub when: RuleSpec,
}

fn default_true() -> bool {
    true
}

fn default_alert() -> PolicyAction {
    PolicyAction::Alert
}

impl PolicyRule {
    /// Compile into a policy definition.
    pub fn compile(&self) -> Result<PolicyDefinition, GovernanceError> {
        let predicate = RulePredicate::compile(&self.when)
            .map_err(|err| GovernanceError::InvalidRule(format!("{}: {}", self.name, err)))?;

        let definition = PolicyDefinition::new(&self.name, self.action, Arc::new(predicate));
        Ok(if self.enabled {
            definition
        } else {
            definition.disabled()
        })
    }
}

/// Compile a rule set, failing on the first invalid rule.
pub fn compile_rules(rules: &[PolicyRule]) -> Result<Vec<PolicyDefinition>, GovernanceError> {
    rules.iter().map(PolicyRule::compile).collect()
}

/// Compiled form of a [`RuleSpec`].
#[derive(Debug)]
pub struct RulePredicate {
    hours: Option<HourWindow>,
    days: Vec<Weekday>,
    endpoints: Vec<String>,
    prompt_patterns: Vec<Regex>,
    max_requests_per_day: Option<u64>,
}

impl RulePredicate {
    pub fn compile(conditions: &RuleSpec) -> Result<Self, GovernanceError> {
        if conditions.hours.is_none()
            && conditions.days.is_empty()
            && conditions.endpoints.is_empty()
            && conditions.prompt_patterns.is_empty()
            && conditions.max_requests_per_day.is_none()
        {
            return Err(GovernanceError::InvalidRule("rule has no conditions".to_string()));
        }

        if let Some(window) = conditions.hours {
            if window.start > 23 || window.end > 24 {
                return Err(GovernanceError::InvalidRule(format!(
                    "hour window {}-{} out of range",
                    window.start, window.end
                )));
            }
        }

        let days = conditions
            .days
            .iter()
            .map(|d| {
                parse_weekday(d)
                    .ok_or_else(|| GovernanceError::InvalidRule(format!("unknown day '{}'", d)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let prompt_patterns = conditions
            .prompt_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| GovernanceError::InvalidRule(format!("pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            hours: conditions.hours,
            days,
            endpoints: conditions
                .endpoints
                .iter()
                .map(|e| e.trim().trim_start_matches("*.").to_ascii_lowercase())
                .collect(),
            prompt_patterns,
            max_requests_per_day: conditions.max_requests_per_day,
        })
    }

    fn endpoint_matches(&self, endpoint: &str) -> bool {
        self.endpoints.iter().any(|domain| {
            endpoint == domain
                || endpoint
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

#[async_trait]
impl Evaluable for RulePredicate {
    async fn evaluate(&self, context: &RequestContext) -> Result<PolicyMatch, GovernanceError> {
        let mut reasons = Vec::new();

        if let Some(window) = self.hours {
            if !window.contains(context.hour()) {
                return Ok(PolicyMatch::miss());
            }
            reasons.push(format!("hour {} in {:02}-{:02}", context.hour(), window.start, window.end));
        }

        if !self.days.is_empty() {
            if !self.days.contains(&context.weekday()) {
                return Ok(PolicyMatch::miss());
            }
            reasons.push(format!("day {}", context.weekday()));
        }

        if !self.endpoints.is_empty() {
            if !self.endpoint_matches(context.endpoint()) {
                return Ok(PolicyMatch::miss());
            }
            reasons.push(format!("endpoint {}", context.endpoint()));
        }

        if !self.prompt_patterns.is_empty() {
            let summary = context.prompt_summary().unwrap_or("");
            match self.prompt_patterns.iter().find(|p| p.is_match(summary)) {
                Some(pattern) => reasons.push(format!("prompt matches /{}/", pattern.as_str())),
                None => return Ok(PolicyMatch::miss()),
            }
        }

        if let Some(limit) = self.max_requests_per_day {
            if context.requests_today() <= limit {
                return Ok(PolicyMatch::miss());
            }
            reasons.push(format!(
                "{} requests today exceeds limit {}",
                context.requests_today(),
                limit
            ));
        }

        Ok(PolicyMatch::hit(reasons.join(", ")))
    }
}
