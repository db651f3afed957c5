//! Enforcement configuration snapshot and its live, atomically swapped handle.

use crate::allowlist::Allowlist;
use crate::consent::{ConsentReport, ConsentValidator};
use crate::emergency::EmergencyOverride;
use crate::error::GovernanceError;
use crate::policy::PolicyAction;
use crate::time_exception::TimeException;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

/// Global operating mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementMode {
    /// Log only.
    #[default]
    Observe,
    /// Log and alert.
    Advisory,
    /// Blocking is possible, subject to consent and per-policy actions.
    Enforce,
}

impl EnforcementMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnforcementMode::Observe => "observe",
            EnforcementMode::Advisory => "advisory",
            EnforcementMode::Enforce => "enforce",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            EnforcementMode::Observe => 0,
            EnforcementMode::Advisory => 1,
            EnforcementMode::Enforce => 2,
        }
    }
}

impl fmt::Display for EnforcementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a mode change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTransition {
    Unchanged,
    /// Towards `enforce`; gated by the consent validator.
    Forward,
    /// Back to `observe`; always permitted.
    Reset,
    /// `enforce` to `advisory`; gated by the consent validator.
    Downgrade,
}

impl ModeTransition {
    pub fn between(from: EnforcementMode, to: EnforcementMode) -> Self {
        if from == to {
            ModeTransition::Unchanged
        } else if to == EnforcementMode::Observe {
            ModeTransition::Reset
        } else if to.rank() > from.rank() {
            ModeTransition::Forward
        } else {
            ModeTransition::Downgrade
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_alert() -> PolicyAction {
    PolicyAction::Alert
}

/// Per-policy action configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_alert")]
    pub action: PolicyAction,
}

impl PolicyOverride {
    pub fn new(action: PolicyAction) -> Self {
        Self {
            enabled: true,
            action,
        }
    }

    pub fn disabled(action: PolicyAction) -> Self {
        Self {
            enabled: false,
            action,
        }
    }
}

/// Immutable enforcement configuration.
///
/// Every field combination is representable; validity is decided by
/// [`ConsentValidator`], not by construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    pub mode: EnforcementMode,
    pub enabled: bool,
    pub consent_accepted: bool,
    /// Per-policy actions keyed by policy name.
    pub policies: BTreeMap<String, PolicyOverride>,
    pub allowlist: Allowlist,
    pub time_exceptions: Vec<TimeException>,
    pub emergency_override: EmergencyOverride,
}

impl EnforcementConfig {
    /// `mode = enforce`, `enabled` and `consent_accepted` all hold.
    pub fn enforcement_active(&self) -> bool {
        self.mode == EnforcementMode::Enforce && self.enabled && self.consent_accepted
    }

    /// Explicit configuration for a policy; a trailing `.rego` is ignored.
    pub fn policy_override(&self, policy_name: &str) -> Option<&PolicyOverride> {
        let key = policy_name.strip_suffix(".rego").unwrap_or(policy_name);
        self.policies.get(key)
    }

    /// Configured action: disabled means `allow`, unconfigured means `alert`.
    pub fn policy_action(&self, policy_name: &str) -> PolicyAction {
        match self.policy_override(policy_name) {
            Some(o) if !o.enabled => PolicyAction::Allow,
            Some(o) => o.action,
            None => PolicyAction::Alert,
        }
    }
}

/// Whether a proposed snapshot must pass the consent validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Validate,
    /// Only for changes that cannot enable blocking, such as resetting to `observe`.
    Unconditional,
}

/// A swapped-in change: the previous and new snapshots plus the validator report.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub previous: Arc<EnforcementConfig>,
    pub current: Arc<EnforcementConfig>,
    pub report: ConsentReport,
}

/// Live configuration: readers take an `Arc` snapshot, writers swap a new one.
///
/// Readers always observe a complete snapshot, either the old one or the new
/// one. Writers are serialised so each change is computed from the snapshot
/// it replaces.
#[derive(Debug)]
pub struct ConfigHandle {
    current: RwLock<Arc<EnforcementConfig>>,
    writer: Mutex<()>,
}

impl ConfigHandle {
    /// Validate `initial` and make it live.
    pub fn new(initial: EnforcementConfig) -> Result<(Self, ConsentReport), GovernanceError> {
        let report = ConsentValidator::require(&initial)?;

        Ok((
            Self {
                current: RwLock::new(Arc::new(initial)),
                writer: Mutex::new(()),
            },
            report,
        ))
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<EnforcementConfig> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Derive a new snapshot from the current one and swap it in.
    ///
    /// With [`Gate::Validate`] a snapshot that fails validation is rejected
    /// and the current snapshot stays live.
    pub fn update<F>(&self, gate: Gate, change: F) -> Result<ConfigChange, GovernanceError>
    where
        F: FnOnce(&EnforcementConfig) -> Result<EnforcementConfig, GovernanceError>,
    {
        let _writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());

        let previous = self.snapshot();
        let proposed = change(&previous)?;
        let report = ConsentValidator::validate(&proposed);

        if gate == Gate::Validate && !report.valid {
            tracing::warn!(errors = ?report.errors, "configuration change rejected");
            return Err(GovernanceError::InvalidConfiguration(report.errors));
        }

        let current = Arc::new(proposed);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&current);

        Ok(ConfigChange {
            previous,
            current,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enforcing() -> EnforcementConfig {
        EnforcementConfig {
            mode: EnforcementMode::Enforce,
            enabled: true,
            consent_accepted: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_are_safe() {
        let config = EnforcementConfig::default();
        assert_eq!(config.mode, EnforcementMode::Observe);
        assert!(!config.enabled);
        assert!(!config.consent_accepted);
        assert!(!config.emergency_override.active);
        assert!(!config.enforcement_active());
    }

    #[test]
    fn test_enforcement_active_requires_all_three() {
        assert!(enforcing().enforcement_active());
        assert!(!EnforcementConfig { consent_accepted: false, ..enforcing() }.enforcement_active());
        assert!(!EnforcementConfig { enabled: false, ..enforcing() }.enforcement_active());
        assert!(!EnforcementConfig { mode: EnforcementMode::Advisory, ..enforcing() }.enforcement_active());
    }

    #[test]
    fn test_policy_action_defaults() {
        let mut config = enforcing();
        config.policies.insert("bedtime".to_string(), PolicyOverride::new(PolicyAction::Block));
        config.policies.insert("homework".to_string(), PolicyOverride::disabled(PolicyAction::Block));

        assert_eq!(config.policy_action("bedtime"), PolicyAction::Block);
        assert_eq!(config.policy_action("bedtime.rego"), PolicyAction::Block);
        assert_eq!(config.policy_action("homework"), PolicyAction::Allow);
        assert_eq!(config.policy_action("unknown"), PolicyAction::Alert);
    }

    #[test]
    fn test_mode_transitions() {
        use EnforcementMode::*;
        assert_eq!(ModeTransition::between(Observe, Advisory), ModeTransition::Forward);
        assert_eq!(ModeTransition::between(Observe, Enforce), ModeTransition::Forward);
        assert_eq!(ModeTransition::between(Enforce, Observe), ModeTransition::Reset);
        assert_eq!(ModeTransition::between(Advisory, Observe), ModeTransition::Reset);
        assert_eq!(ModeTransition::between(Enforce, Advisory), ModeTransition::Downgrade);
        assert_eq!(ModeTransition::between(Advisory, Advisory), ModeTransition::Unchanged);
    }

    #[test]
    fn test_deserialize_partial_document() {
        let config: EnforcementConfig = serde_json::from_str(
            r#"{"mode": "advisory", "policies": {"bedtime": {"action": "block"}}}"#,
        )
        .unwrap();
        assert_eq!(config.mode, EnforcementMode::Advisory);
        assert!(!config.enabled);
        assert_eq!(config.policies["bedtime"], PolicyOverride::new(PolicyAction::Block));
    }

    #[test]
    fn test_handle_rejects_invalid_initial_config() {
        let invalid = EnforcementConfig {
            consent_accepted: false,
            ..enforcing()
        };
        assert!(matches!(
            ConfigHandle::new(invalid),
            Err(GovernanceError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_rejected_update_keeps_previous_snapshot() {
        let (handle, _) = ConfigHandle::new(EnforcementConfig::default()).unwrap();

        let result = handle.update(Gate::Validate, |current| {
            Ok(EnforcementConfig {
                enabled: true,
                ..current.clone()
            })
        });

        assert!(matches!(result, Err(GovernanceError::InvalidConfiguration(_))));
        assert_eq!(*handle.snapshot(), EnforcementConfig::default());
    }

    #[test]
    fn test_accepted_update_swaps_snapshot() {
        let (handle, _) = ConfigHandle::new(EnforcementConfig::default()).unwrap();
        let before = handle.snapshot();

        let change = handle
            .update(Gate::Validate, |_| Ok(enforcing()))
            .unwrap();

        assert!(Arc::ptr_eq(&change.previous, &before));
        assert!(handle.snapshot().enforcement_active());
        // Snapshots taken earlier are unaffected.
        assert!(!before.enforcement_active());
    }
}
