//! EnforcementEngine - turns policy results into one allow/alert/block decision.
//!
//! Resolution order, first applicable rule wins:
//!
//! 1. Emergency override active: allow.
//! 2. Client on the allowlist or inside an active time exception: allow, with
//!    `allow_override` set.
//! 3. Global gating fails (`mode != enforce`, not enabled, or no consent):
//!    any `block` is downgraded to `alert`.
//! 4. Among matched policies the most severe configured action wins. An
//!    unconfigured policy defaults to `alert`, a disabled one to `allow`.
//!    Ties go to the earliest result in policy order.
//! 5. `block` survives only if every gate above passed.
//!
//! `decide` is a pure, total function of its inputs. Time comparisons use the
//! request timestamp, never the wall clock.

use crate::audit::AuditEventType;
use crate::allowlist::AllowlistMatch;
use crate::config::{EnforcementConfig, EnforcementMode};
use crate::context::RequestContext;
use crate::policy::{PolicyAction, PolicyResult};
use crate::time_exception::active_exception;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Why a request bypassed policy resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Bypass {
    EmergencyOverride { activated_by: Option<String> },
    Allowlist { matched: AllowlistMatch },
    TimeException { name: String },
}

/// Outcome of [`EnforcementEngine::decide`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementDecision {
    pub should_block: bool,
    pub action_taken: PolicyAction,
    /// Winning policy, if any matched. Set for bypasses too, naming the
    /// policy that would otherwise have applied.
    pub policy_name: Option<String>,
    pub reason: String,
    pub timestamp: DateTime<FixedOffset>,
    /// The client was exempted by an allowlist entry or a time exception.
    pub allow_override: bool,
    pub bypass: Option<Bypass>,
    /// Mode of the snapshot the decision was made against.
    pub mode: EnforcementMode,
}

impl EnforcementDecision {
    /// Audit event type this decision is recorded under.
    pub fn audit_event_type(&self) -> AuditEventType {
        match &self.bypass {
            Some(Bypass::EmergencyOverride { .. }) => AuditEventType::EmergencyOverride,
            Some(Bypass::Allowlist { .. }) => AuditEventType::AllowlistBypass,
            Some(Bypass::TimeException { .. }) => AuditEventType::TimeExceptionActive,
            None => match self.action_taken {
                PolicyAction::Allow => AuditEventType::RequestAllowed,
                PolicyAction::Alert => AuditEventType::RequestAlerted,
                PolicyAction::Block => AuditEventType::RequestBlocked,
            },
        }
    }
}

/// Winning policy after per-policy resolution.
struct Resolution<'a> {
    policy_name: &'a str,
    action: PolicyAction,
    downgraded: bool,
}

/// Stateless decision function.
pub struct EnforcementEngine;

impl EnforcementEngine {
    /// Decide how to treat a request.
    pub fn decide(
        context: &RequestContext,
        results: &[PolicyResult],
        config: &EnforcementConfig,
    ) -> EnforcementDecision {
        let gating_passed = config.enforcement_active();
        let resolution = Self::resolve(results, config, gating_passed);
        let would_apply = resolution.as_ref().map(|r| r.policy_name.to_string());

        let allow = |reason: String, bypass: Bypass, allow_override: bool| EnforcementDecision {
            should_block: false,
            action_taken: PolicyAction::Allow,
            policy_name: would_apply.clone(),
            reason,
            timestamp: context.timestamp(),
            allow_override,
            bypass: Some(bypass),
            mode: config.mode,
        };

        if config.emergency_override.active {
            return allow(
                "emergency override active; all blocking disabled".to_string(),
                Bypass::EmergencyOverride {
                    activated_by: config.emergency_override.activated_by.clone(),
                },
                false,
            );
        }

        if let Some(matched) =
            config
                .allowlist
                .find(context.client_ip(), context.device_id(), context.timestamp())
        {
            return allow(matched.reason(), Bypass::Allowlist { matched }, true);
        }

        if let Some(exception) =
            active_exception(&config.time_exceptions, context.client_ip(), context.timestamp())
        {
            return allow(
                format!("time exception '{}' active", exception.name),
                Bypass::TimeException {
                    name: exception.name.clone(),
                },
                true,
            );
        }

        let (policy_name, action_taken, reason) = match resolution {
            None => (None, PolicyAction::Allow, "no policy matched".to_string()),
            Some(r) => {
                let reason = if r.downgraded {
                    format!(
                        "policy '{}' matched; block downgraded to alert (enforcement not active in mode '{}')",
                        r.policy_name, config.mode
                    )
                } else {
                    format!("policy '{}' matched; action {}", r.policy_name, r.action)
                };
                (Some(r.policy_name.to_string()), r.action, reason)
            }
        };

        EnforcementDecision {
            should_block: action_taken == PolicyAction::Block && gating_passed,
            action_taken,
            policy_name,
            reason,
            timestamp: context.timestamp(),
            allow_override: false,
            bypass: None,
            mode: config.mode,
        }
    }

    fn resolve<'a>(
        results: &'a [PolicyResult],
        config: &EnforcementConfig,
        gating_passed: bool,
    ) -> Option<Resolution<'a>> {
        let mut winner: Option<Resolution<'a>> = None;

        for result in results.iter().filter(|r| r.matched) {
            let configured = config.policy_action(&result.policy_name);
            let (action, downgraded) = if configured == PolicyAction::Block && !gating_passed {
                (PolicyAction::Alert, true)
            } else {
                (configured, false)
            };

            // Strictly greater keeps the earliest policy on ties.
            if winner.as_ref().map_or(true, |w| action > w.action) {
                winner = Some(Resolution {
                    policy_name: &result.policy_name,
                    action,
                    downgraded,
                });
            }
        }

        winner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::AllowlistDevice;
    use crate::config::PolicyOverride;
    use crate::emergency::EmergencyOverride;
    use crate::time_exception::TimeException;
    use chrono::TimeZone;

    fn request(ip: &str) -> RequestContext {
        let at = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 4, 22, 0, 0)
            .unwrap();
        RequestContext::new(ip, "api.openai.com", at)
    }

    fn hit(name: &str) -> PolicyResult {
        PolicyResult::matched(name, PolicyAction::Block, "matched")
    }

    fn enforcing() -> EnforcementConfig {
        let mut config = EnforcementConfig {
            mode: EnforcementMode::Enforce,
            enabled: true,
            consent_accepted: true,
            ..Default::default()
        };
        config
            .policies
            .insert("bedtime".to_string(), PolicyOverride::new(PolicyAction::Block));
        config
    }

    #[test]
    fn test_block_when_fully_gated() {
        let decision = EnforcementEngine::decide(&request("192.168.1.20"), &[hit("bedtime")], &enforcing());
        assert!(decision.should_block);
        assert_eq!(decision.action_taken, PolicyAction::Block);
        assert_eq!(decision.policy_name.as_deref(), Some("bedtime"));
        assert_eq!(decision.audit_event_type(), AuditEventType::RequestBlocked);
        assert!(!decision.allow_override);
    }

    #[test]
    fn test_gating_downgrades_block_to_alert() {
        for mode in [EnforcementMode::Observe, EnforcementMode::Advisory] {
            let config = EnforcementConfig { mode, ..enforcing() };
            let decision = EnforcementEngine::decide(&request("192.168.1.20"), &[hit("bedtime")], &config);
            assert!(!decision.should_block);
            assert_eq!(decision.action_taken, PolicyAction::Alert);
            assert!(decision.reason.contains("downgraded"));
        }
    }

    #[test]
    fn test_no_match_allows() {
        let results = vec![PolicyResult::unmatched("bedtime", PolicyAction::Block, "")];
        let decision = EnforcementEngine::decide(&request("192.168.1.20"), &results, &enforcing());
        assert_eq!(decision.action_taken, PolicyAction::Allow);
        assert_eq!(decision.policy_name, None);
        assert_eq!(decision.audit_event_type(), AuditEventType::RequestAllowed);
    }

    #[test]
    fn test_unconfigured_policy_defaults_to_alert() {
        let decision = EnforcementEngine::decide(&request("192.168.1.20"), &[hit("homework")], &enforcing());
        assert_eq!(decision.action_taken, PolicyAction::Alert);
        assert!(!decision.should_block);
    }

    #[test]
    fn test_disabled_policy_allows() {
        let mut config = enforcing();
        config
            .policies
            .insert("bedtime".to_string(), PolicyOverride::disabled(PolicyAction::Block));
        let decision = EnforcementEngine::decide(&request("192.168.1.20"), &[hit("bedtime")], &config);
        assert_eq!(decision.action_taken, PolicyAction::Allow);
        assert!(!decision.should_block);
    }

    #[test]
    fn test_most_severe_wins_and_first_breaks_ties() {
        let mut config = enforcing();
        config
            .policies
            .insert("privacy".to_string(), PolicyOverride::new(PolicyAction::Alert));
        config
            .policies
            .insert("homework".to_string(), PolicyOverride::new(PolicyAction::Block));

        let results = vec![hit("privacy"), hit("bedtime"), hit("homework")];
        let decision = EnforcementEngine::decide(&request("192.168.1.20"), &results, &config);
        assert_eq!(decision.action_taken, PolicyAction::Block);
        assert_eq!(decision.policy_name.as_deref(), Some("bedtime"));
    }

    #[test]
    fn test_emergency_override_wins_over_everything() {
        let mut config = enforcing();
        config.emergency_override = EmergencyOverride {
            active: true,
            activated_by: Some("admin".to_string()),
            ..Default::default()
        };
        let decision = EnforcementEngine::decide(&request("192.168.1.20"), &[hit("bedtime")], &config);
        assert!(!decision.should_block);
        assert_eq!(decision.action_taken, PolicyAction::Allow);
        assert!(!decision.allow_override);
        assert_eq!(decision.audit_event_type(), AuditEventType::EmergencyOverride);
    }

    #[test]
    fn test_allowlist_wins_over_block() {
        let mut config = enforcing();
        config
            .allowlist
            .devices
            .push(AllowlistDevice::new("192.168.1.20", "dad-laptop"));
        let decision = EnforcementEngine::decide(&request("192.168.1.20"), &[hit("bedtime")], &config);
        assert!(!decision.should_block);
        assert!(decision.allow_override);
        assert_eq!(decision.policy_name.as_deref(), Some("bedtime"));
        assert_eq!(decision.audit_event_type(), AuditEventType::AllowlistBypass);
    }

    #[test]
    fn test_allowlist_by_mac_from_device_id() {
        let mut config = enforcing();
        config
            .allowlist
            .devices
            .push(AllowlistDevice::new("10.0.0.9", "tablet").with_mac("aa:bb:cc:dd:ee:ff"));
        let context = request("192.168.1.20").with_device("AA-BB-CC-DD-EE-FF");
        let decision = EnforcementEngine::decide(&context, &[hit("bedtime")], &config);
        assert!(decision.allow_override);
    }

    #[test]
    fn test_time_exception_bypass() {
        let mut config = enforcing();
        config.time_exceptions.push(TimeException {
            name: "late_study".to_string(),
            description: None,
            days: vec!["monday".to_string()],
            start_time: "21:00".to_string(),
            end_time: "23:00".to_string(),
            device_ips: vec!["192.168.1.20".to_string()],
            enabled: true,
        });
        let decision = EnforcementEngine::decide(&request("192.168.1.20"), &[hit("bedtime")], &config);
        assert!(!decision.should_block);
        assert!(decision.allow_override);
        assert_eq!(decision.audit_event_type(), AuditEventType::TimeExceptionActive);

        // Other devices are unaffected.
        let other = EnforcementEngine::decide(&request("192.168.1.21"), &[hit("bedtime")], &config);
        assert!(other.should_block);
    }

    #[test]
    fn test_decide_is_deterministic() {
        let context = request("192.168.1.20");
        let results = vec![hit("bedtime"), hit("homework")];
        let config = enforcing();
        assert_eq!(
            EnforcementEngine::decide(&context, &results, &config),
            EnforcementEngine::decide(&context, &results, &config)
        );
    }
}
