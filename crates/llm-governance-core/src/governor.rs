//! Governor - the governance pipeline and its configuration mutation surface.
//!
//! Every request goes `RequestContext -> evaluate -> decide -> append`.
//! Every configuration change goes through the consent gate in
//! [`ConfigHandle::update`] and, when applied, is audited.

use crate::allowlist::{normalize_ip, AllowlistDevice};
use crate::audit::{AuditEvent, AuditLogger, AuditStore, LoggerOptions};
use crate::config::{
    ConfigChange, ConfigHandle, EnforcementConfig, EnforcementMode, Gate, ModeTransition, PolicyOverride,
};
use crate::consent::ConsentReport;
use crate::context::{DeviceCounters, RequestContext};
use crate::engine::{EnforcementDecision, EnforcementEngine};
use crate::error::GovernanceError;
use crate::evaluator::{PolicyEvaluator, DEFAULT_EVALUATION_TIMEOUT};
use crate::policy::{PolicyAction, PolicyDefinition};
use crate::time_exception::TimeException;
use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Builder for [`Governor`].
pub struct GovernorBuilder {
    config: EnforcementConfig,
    policies: Vec<PolicyDefinition>,
    evaluation_timeout: Duration,
    store: Option<Arc<AuditStore>>,
    logger_options: LoggerOptions,
}

impl GovernorBuilder {
    fn new() -> Self {
        Self {
            config: EnforcementConfig::default(),
            policies: Vec::new(),
            evaluation_timeout: DEFAULT_EVALUATION_TIMEOUT,
            store: None,
            logger_options: LoggerOptions::default(),
        }
    }

    /// Initial configuration. Validated in [`build`](Self::build).
    pub fn config(mut self, config: EnforcementConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policies(mut self, policies: Vec<PolicyDefinition>) -> Self {
        self.policies = policies;
        self
    }

    pub fn policy(mut self, policy: PolicyDefinition) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn evaluation_timeout(mut self, timeout: Duration) -> Self {
        self.evaluation_timeout = timeout;
        self
    }

    /// Audit store; an in-memory store is used when none is given.
    pub fn audit_store(mut self, store: Arc<AuditStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn logger_options(mut self, options: LoggerOptions) -> Self {
        self.logger_options = options;
        self
    }

    /// Validate the initial configuration and start the audit writer.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Result<Governor, GovernanceError> {
        let (config, _report) = ConfigHandle::new(self.config)?;

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(AuditStore::open_in_memory()?),
        };

        let snapshot = config.snapshot();
        tracing::info!(
            mode = %snapshot.mode,
            enabled = snapshot.enabled,
            consent_accepted = snapshot.consent_accepted,
            policies = self.policies.len(),
            "governor started"
        );

        Ok(Governor {
            config,
            policies: RwLock::new(Arc::new(self.policies)),
            evaluator: PolicyEvaluator::new(self.evaluation_timeout),
            counters: DeviceCounters::new(),
            audit: AuditLogger::spawn(store, self.logger_options),
        })
    }
}

/// The governance pipeline.
pub struct Governor {
    config: ConfigHandle,
    policies: RwLock<Arc<Vec<PolicyDefinition>>>,
    evaluator: PolicyEvaluator,
    counters: DeviceCounters,
    audit: AuditLogger,
}

impl Governor {
    pub fn builder() -> GovernorBuilder {
        GovernorBuilder::new()
    }

    /// Govern one request: count it, evaluate policies, decide and audit.
    pub async fn process(&self, context: RequestContext) -> EnforcementDecision {
        let count = self.counters.record(context.device_key(), context.timestamp());
        let context = context.with_requests_today(count);

        let config = self.config.snapshot();
        let policies = self.policies();

        let results = self.evaluator.evaluate(&context, &policies).await;
        let decision = EnforcementEngine::decide(&context, &results, &config);

        if decision.should_block {
            tracing::warn!(
                client_ip = %context.client_ip(),
                endpoint = %context.endpoint(),
                policy = decision.policy_name.as_deref().unwrap_or("-"),
                "request blocked"
            );
        } else {
            tracing::debug!(
                client_ip = %context.client_ip(),
                endpoint = %context.endpoint(),
                action = %decision.action_taken,
                policy = decision.policy_name.as_deref().unwrap_or("-"),
                "request decided"
            );
        }

        self.audit.append(AuditEvent::from_decision(&context, &decision, &results));
        decision
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<EnforcementConfig> {
        self.config.snapshot()
    }

    /// Current policy set.
    pub fn policies(&self) -> Arc<Vec<PolicyDefinition>> {
        Arc::clone(&self.policies.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Requests counted today for a device.
    pub fn requests_today(&self, device: &str) -> u64 {
        self.counters.get(device, Utc::now().fixed_offset())
    }

    /// Policy predicate failures since startup.
    pub fn evaluation_failures(&self) -> u64 {
        self.evaluator.failure_count()
    }

    /// Switch the global mode.
    ///
    /// Moving to `observe` is always permitted. Any other target must leave a
    /// configuration that passes the consent validator. Returns `None` when
    /// the mode is already `mode`.
    pub fn set_mode(&self, mode: EnforcementMode, actor: &str) -> Result<Option<ConfigChange>, GovernanceError> {
        let gate = if mode == EnforcementMode::Observe {
            Gate::Unconditional
        } else {
            Gate::Validate
        };

        let change = self.config.update(gate, |current| {
            Ok(EnforcementConfig {
                mode,
                ..current.clone()
            })
        })?;

        if !self.record_mode_change(&change, actor) {
            return Ok(None);
        }
        Ok(Some(change))
    }

    /// Accept or revoke operator consent.
    ///
    /// Revoking consent also disables enforcement and drops `enforce` back to
    /// `observe`.
    pub fn set_consent(&self, accepted: bool, actor: &str) -> Result<ConfigChange, GovernanceError> {
        let change = self.config.update(Gate::Validate, |current| {
            let mut next = current.clone();
            next.consent_accepted = accepted;
            if !accepted {
                next.enabled = false;
                if next.mode == EnforcementMode::Enforce {
                    next.mode = EnforcementMode::Observe;
                }
            }
            Ok(next)
        })?;

        self.record_config_change(
            &change,
            if accepted { "consent accepted" } else { "consent revoked" },
            json!({ "consent_accepted": accepted }),
            actor,
        );
        self.record_mode_change(&change, actor);
        Ok(change)
    }

    /// Turn enforcement on or off.
    ///
    /// Turning it off while in `enforce` drops the mode back to `observe`.
    pub fn set_enforcement_enabled(&self, enabled: bool, actor: &str) -> Result<ConfigChange, GovernanceError> {
        let change = self.config.update(Gate::Validate, |current| {
            let mut next = current.clone();
            next.enabled = enabled;
            if !enabled && next.mode == EnforcementMode::Enforce {
                next.mode = EnforcementMode::Observe;
            }
            Ok(next)
        })?;

        self.record_config_change(
            &change,
            if enabled { "enforcement enabled" } else { "enforcement disabled" },
            json!({ "enabled": enabled }),
            actor,
        );
        self.record_mode_change(&change, actor);
        Ok(change)
    }

    /// Configure the action of one policy.
    pub fn set_policy_action(
        &self,
        policy_name: &str,
        action: PolicyAction,
        enabled: bool,
        actor: &str,
    ) -> Result<ConfigChange, GovernanceError> {
        let key = policy_name.strip_suffix(".rego").unwrap_or(policy_name).to_string();
        let change = self.config.update(Gate::Validate, |current| {
            let mut next = current.clone();
            next.policies.insert(key.clone(), PolicyOverride { enabled, action });
            Ok(next)
        })?;

        self.record_config_change(
            &change,
            "policy action changed",
            json!({ "policy": key, "action": action, "enabled": enabled }),
            actor,
        );
        Ok(change)
    }

    /// Replace the whole configuration.
    pub fn replace_config(&self, config: EnforcementConfig, actor: &str) -> Result<ConfigChange, GovernanceError> {
        let change = self.config.update(Gate::Validate, move |_| Ok(config))?;

        self.record_config_change(
            &change,
            "configuration replaced",
            json!({
                "mode": change.current.mode,
                "enabled": change.current.enabled,
                "consent_accepted": change.current.consent_accepted,
                "policies": change.current.policies.len(),
            }),
            actor,
        );
        self.record_mode_change(&change, actor);
        Ok(change)
    }

    /// Swap in a new policy set. In-flight requests finish on the old one.
    pub fn replace_policies(&self, policies: Vec<PolicyDefinition>, actor: &str) {
        let names: Vec<String> = policies.iter().map(|p| p.name.clone()).collect();
        *self.policies.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(policies);

        tracing::info!(actor = %actor, policies = names.len(), "policy set replaced");
        self.audit.append(AuditEvent::config_change(
            "policy set replaced",
            json!({ "policies": names }),
            actor,
            Utc::now(),
        ));
    }

    /// Replace the time exception rules.
    pub fn set_time_exceptions(
        &self,
        exceptions: Vec<TimeException>,
        actor: &str,
    ) -> Result<ConfigChange, GovernanceError> {
        let names: Vec<String> = exceptions.iter().map(|e| e.name.clone()).collect();
        let change = self.config.update(Gate::Validate, move |current| {
            Ok(EnforcementConfig {
                time_exceptions: exceptions,
                ..current.clone()
            })
        })?;

        self.record_config_change(
            &change,
            "time exceptions replaced",
            json!({ "time_exceptions": names }),
            actor,
        );
        Ok(change)
    }

    /// Add a device to the allowlist, replacing any entry with the same IP.
    pub fn add_allowlist_device(
        &self,
        device: AllowlistDevice,
        actor: &str,
    ) -> Result<ConfigChange, GovernanceError> {
        let ip = normalize_ip(&device.ip);
        let name = device.name.clone();
        let change = self.config.update(Gate::Validate, |current| {
            let mut next = current.clone();
            next.allowlist.devices.retain(|d| normalize_ip(&d.ip) != ip);
            next.allowlist.devices.push(AllowlistDevice {
                ip: ip.clone(),
                ..device
            });
            Ok(next)
        })?;

        tracing::info!(actor = %actor, client_ip = %ip, device = %name, "allowlist device added");
        self.audit
            .append(AuditEvent::allowlist_change("add", &ip, &name, actor, Utc::now()));
        Ok(change)
    }

    /// Remove a device from the allowlist by IP.
    pub fn remove_allowlist_device(&self, ip: &str, actor: &str) -> Result<ConfigChange, GovernanceError> {
        let ip = normalize_ip(ip);
        let mut removed_name = String::new();
        let change = self.config.update(Gate::Validate, |current| {
            let mut next = current.clone();
            let position = next
                .allowlist
                .devices
                .iter()
                .position(|d| normalize_ip(&d.ip) == ip)
                .ok_or_else(|| GovernanceError::AllowlistEntryNotFound(ip.clone()))?;
            removed_name = next.allowlist.devices.remove(position).name;
            Ok(next)
        })?;

        tracing::info!(actor = %actor, client_ip = %ip, device = %removed_name, "allowlist device removed");
        self.audit
            .append(AuditEvent::allowlist_change("remove", &ip, &removed_name, actor, Utc::now()));
        Ok(change)
    }

    /// Set the emergency override password.
    pub fn set_override_password(&self, password: &str, actor: &str) -> Result<ConfigChange, GovernanceError> {
        let change = self.config.update(Gate::Validate, |current| {
            Ok(EnforcementConfig {
                emergency_override: current.emergency_override.with_password(password),
                ..current.clone()
            })
        })?;

        self.record_config_change(&change, "emergency override password changed", json!({}), actor);
        Ok(change)
    }

    /// Disable all blocking immediately.
    ///
    /// Never refused by the consent validator since it cannot enable blocking.
    pub fn activate_emergency_override(
        &self,
        password: Option<&str>,
        actor: &str,
    ) -> Result<ConfigChange, GovernanceError> {
        let change = self.config.update(Gate::Unconditional, |current| {
            Ok(EnforcementConfig {
                emergency_override: current.emergency_override.activate(password, actor, Utc::now())?,
                ..current.clone()
            })
        });

        let change = match change {
            Ok(change) => change,
            Err(err) => {
                tracing::warn!(actor = %actor, error = %err, "emergency override activation refused");
                return Err(err);
            }
        };

        tracing::warn!(actor = %actor, "emergency override activated");
        self.audit
            .append(AuditEvent::emergency_override_toggled(true, actor, Utc::now()));
        Ok(change)
    }

    /// Restore normal enforcement after an emergency override.
    pub fn deactivate_emergency_override(
        &self,
        password: Option<&str>,
        actor: &str,
    ) -> Result<ConfigChange, GovernanceError> {
        let change = self.config.update(Gate::Validate, |current| {
            Ok(EnforcementConfig {
                emergency_override: current.emergency_override.deactivate(password)?,
                ..current.clone()
            })
        })?;

        tracing::warn!(actor = %actor, "emergency override deactivated");
        self.audit
            .append(AuditEvent::emergency_override_toggled(false, actor, Utc::now()));
        Ok(change)
    }

    /// Validate the live configuration.
    pub fn validate_current(&self) -> ConsentReport {
        crate::consent::ConsentValidator::validate(&self.config.snapshot())
    }

    fn record_config_change(
        &self,
        change: &ConfigChange,
        summary: &str,
        details: serde_json::Value,
        actor: &str,
    ) {
        for warning in &change.report.warnings {
            tracing::warn!(warning = %warning, "configuration warning");
        }
        tracing::info!(actor = %actor, summary = %summary, "configuration changed");
        self.audit
            .append(AuditEvent::config_change(summary, details, actor, Utc::now()));
    }

    /// Audit a mode transition. Returns false when the mode did not change.
    fn record_mode_change(&self, change: &ConfigChange, actor: &str) -> bool {
        let from = change.previous.mode;
        let to = change.current.mode;
        let transition = ModeTransition::between(from, to);
        if transition == ModeTransition::Unchanged {
            return false;
        }

        tracing::warn!(actor = %actor, from = %from, to = %to, transition = ?transition, "enforcement mode changed");
        self.audit
            .append(AuditEvent::mode_change(from, to, actor, Utc::now()));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEventType, EventFilter, TimeRange};
    use crate::policy::{FnPredicate, PolicyMatch};
    use chrono::{FixedOffset, TimeZone};

    fn bedtime() -> PolicyDefinition {
        PolicyDefinition::new(
            "bedtime",
            PolicyAction::Block,
            Arc::new(FnPredicate::new(|ctx| {
                Ok(if ctx.hour() >= 21 {
                    PolicyMatch::hit("after 21:00")
                } else {
                    PolicyMatch::miss()
                })
            })),
        )
    }

    fn late_request() -> RequestContext {
        let at = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 4, 22, 0, 0)
            .unwrap();
        RequestContext::new("192.168.1.20", "api.openai.com", at)
    }

    async fn events_of(governor: &Governor, event_type: AuditEventType) -> Vec<AuditEvent> {
        governor.audit().flush().await.unwrap();
        governor
            .audit()
            .recent(
                EventFilter {
                    event_type: Some(event_type),
                    ..Default::default()
                },
                100,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let result = Governor::builder()
            .config(EnforcementConfig {
                enabled: true,
                ..Default::default()
            })
            .build();
        assert!(matches!(result, Err(GovernanceError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_forward_transition_requires_consent() {
        let governor = Governor::builder().build().unwrap();

        let err = governor.set_mode(EnforcementMode::Enforce, "admin").unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidConfiguration(_)));
        assert_eq!(governor.config().mode, EnforcementMode::Observe);
        assert!(events_of(&governor, AuditEventType::ModeChange).await.is_empty());

        governor.set_consent(true, "admin").unwrap();
        governor.set_enforcement_enabled(true, "admin").unwrap();
        assert!(governor.set_mode(EnforcementMode::Enforce, "admin").unwrap().is_some());
        assert!(governor.config().enforcement_active());
    }

    #[tokio::test]
    async fn test_same_mode_is_not_audited() {
        let governor = Governor::builder().build().unwrap();
        assert!(governor.set_mode(EnforcementMode::Observe, "admin").unwrap().is_none());
        assert!(governor.set_mode(EnforcementMode::Advisory, "admin").unwrap().is_some());
        assert!(governor.set_mode(EnforcementMode::Advisory, "admin").unwrap().is_none());

        governor.audit().flush().await.unwrap();
        let history = governor.audit().mode_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to, Some(EnforcementMode::Advisory));
        assert_eq!(history[0].actor.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_revoking_consent_cascades() {
        let governor = Governor::builder()
            .config(EnforcementConfig {
                mode: EnforcementMode::Enforce,
                enabled: true,
                consent_accepted: true,
                ..Default::default()
            })
            .build()
            .unwrap();

        let change = governor.set_consent(false, "admin").unwrap();
        assert!(!change.current.enabled);
        assert_eq!(change.current.mode, EnforcementMode::Observe);
        assert_eq!(events_of(&governor, AuditEventType::ModeChange).await.len(), 1);
        assert_eq!(events_of(&governor, AuditEventType::ConfigChange).await.len(), 1);
    }

    #[tokio::test]
    async fn test_process_blocks_and_audits() {
        let mut config = EnforcementConfig {
            mode: EnforcementMode::Enforce,
            enabled: true,
            consent_accepted: true,
            ..Default::default()
        };
        config
            .policies
            .insert("bedtime".to_string(), PolicyOverride::new(PolicyAction::Block));
        let governor = Governor::builder().config(config).policy(bedtime()).build().unwrap();

        let decision = governor.process(late_request()).await;
        assert!(decision.should_block);

        let blocked = events_of(&governor, AuditEventType::RequestBlocked).await;
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].policy_name.as_deref(), Some("bedtime"));
        assert_eq!(blocked[0].details["requests_today"], 1);
    }

    #[tokio::test]
    async fn test_emergency_override_round_trip() {
        let governor = Governor::builder().build().unwrap();
        governor.set_override_password("hunter2", "admin").unwrap();

        assert!(matches!(
            governor.activate_emergency_override(Some("wrong"), "admin"),
            Err(GovernanceError::OverrideRejected(_))
        ));
        governor
            .activate_emergency_override(Some("hunter2"), "admin")
            .unwrap();
        assert!(governor.config().emergency_override.active);

        governor
            .deactivate_emergency_override(Some("hunter2"), "admin")
            .unwrap();
        assert!(!governor.config().emergency_override.active);

        assert_eq!(
            events_of(&governor, AuditEventType::EmergencyOverrideActivated).await.len(),
            1
        );
        assert_eq!(
            events_of(&governor, AuditEventType::EmergencyOverrideDeactivated).await.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_allowlist_add_and_remove() {
        let governor = Governor::builder().build().unwrap();
        governor
            .add_allowlist_device(AllowlistDevice::new("192.168.1.10", "dad-laptop"), "admin")
            .unwrap();
        governor
            .add_allowlist_device(AllowlistDevice::new("192.168.1.10", "dad-laptop-2"), "admin")
            .unwrap();
        assert_eq!(governor.config().allowlist.devices.len(), 1);
        assert_eq!(governor.config().allowlist.devices[0].name, "dad-laptop-2");

        governor.remove_allowlist_device("192.168.1.10", "admin").unwrap();
        assert!(governor.config().allowlist.devices.is_empty());
        assert!(matches!(
            governor.remove_allowlist_device("192.168.1.10", "admin"),
            Err(GovernanceError::AllowlistEntryNotFound(_))
        ));

        assert_eq!(events_of(&governor, AuditEventType::AllowlistChange).await.len(), 3);
        let summary = governor.audit().summary(TimeRange::all()).await.unwrap();
        assert_eq!(summary.config_changes, 3);
    }

    #[tokio::test]
    async fn test_replace_policies_takes_effect() {
        let governor = Governor::builder().build().unwrap();
        assert!(governor.process(late_request()).await.policy_name.is_none());

        governor.replace_policies(vec![bedtime()], "admin");
        let decision = governor.process(late_request()).await;
        assert_eq!(decision.policy_name.as_deref(), Some("bedtime"));
        assert_eq!(decision.action_taken, PolicyAction::Alert);
        assert_eq!(events_of(&governor, AuditEventType::ConfigChange).await.len(), 1);
    }
}
