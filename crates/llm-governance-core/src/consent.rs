//! ConsentValidator - gate that decides whether a configuration may go live.
//!
//! Enforcement can block LLM traffic that applications depend on, so it is
//! never activated without an explicit operator acknowledgement. Every
//! configuration snapshot passes through [`ConsentValidator::validate`]
//! before it is swapped in.

use crate::allowlist::normalize_mac;
use crate::config::{EnforcementConfig, EnforcementMode};
use crate::error::GovernanceError;
use crate::policy::PolicyAction;
use serde::{Deserialize, Serialize};

/// Warning shown to operators before they accept consent.
pub const CONSENT_WARNING: &str = "\
WARNING: Enforcement mode will actively BLOCK LLM requests based on your policies.

This can break:
- AI-powered applications and services
- Chat assistants and other LLM interfaces
- Development tools that use LLM APIs
- Any software relying on intercepted endpoints

Before enabling enforcement mode:
1. Test all policies in 'observe' mode first
2. Review audit logs to understand what will be blocked
3. Configure per-policy actions carefully (allow/alert/block)
4. Have a plan to quickly disable enforcement if needed

By setting 'consent_accepted', you acknowledge these risks.";

/// Outcome of validating a configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Pure validation over a configuration snapshot.
pub struct ConsentValidator;

impl ConsentValidator {
    /// Validate `config`. Never fails; problems are reported in the result.
    pub fn validate(config: &EnforcementConfig) -> ConsentReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if config.enabled && !config.consent_accepted {
            errors.push("enforcement is enabled but consent has not been accepted".to_string());
        }

        if config.mode == EnforcementMode::Enforce {
            if !config.enabled {
                errors.push("mode 'enforce' requires enforcement to be enabled".to_string());
            }
            if !config.consent_accepted {
                errors.push("mode 'enforce' requires consent to be accepted".to_string());
            }
        }

        if config.enabled && config.mode != EnforcementMode::Enforce {
            warnings.push(format!(
                "enforcement is enabled but mode is '{}'; enforcement will not activate",
                config.mode
            ));
        }

        if !config.enabled {
            for (name, policy) in &config.policies {
                if policy.enabled && policy.action == PolicyAction::Block {
                    warnings.push(format!(
                        "policy '{}' is set to block but enforcement is disabled; policy is inert",
                        name
                    ));
                }
            }
        }

        for exception in &config.time_exceptions {
            errors.extend(exception.problems());
        }

        for device in &config.allowlist.devices {
            if let Some(mac) = device.mac.as_deref() {
                if normalize_mac(mac).is_none() {
                    warnings.push(format!(
                        "allowlist device '{}' has an invalid MAC address '{}'; it will match by IP only",
                        device.name, mac
                    ));
                }
            }
        }

        ConsentReport {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Validate and turn an invalid report into an error.
    pub fn require(config: &EnforcementConfig) -> Result<ConsentReport, GovernanceError> {
        let report = Self::validate(config);
        if !report.valid {
            return Err(GovernanceError::InvalidConfiguration(report.errors));
        }
        for warning in &report.warnings {
            tracing::warn!(warning = %warning, "consent validation warning");
        }
        Ok(report)
    }

    pub fn consent_warning() -> &'static str {
        CONSENT_WARNING
    }
}
