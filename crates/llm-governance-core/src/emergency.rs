//! Emergency override: operator kill-switch that disables all blocking.

use crate::error::GovernanceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const HASH_PREFIX: &str = "sha256:";

fn default_true() -> bool {
    true
}

/// Emergency override state carried in every configuration snapshot.
///
/// Transitions return a new value; the live snapshot is swapped by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyOverride {
    #[serde(default, alias = "enabled")]
    pub active: bool,
    /// `sha256:<hex>` digest of the operator password.
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default = "default_true")]
    pub require_password: bool,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub activated_by: Option<String>,
}

impl Default for EmergencyOverride {
    fn default() -> Self {
        Self {
            active: false,
            password_hash: None,
            require_password: true,
            activated_at: None,
            activated_by: None,
        }
    }
}

impl EmergencyOverride {
    /// Activated copy of this state.
    pub fn activate(
        &self,
        password: Option<&str>,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<Self, GovernanceError> {
        self.check_password(password)?;

        Ok(Self {
            active: true,
            activated_at: Some(at),
            activated_by: Some(actor.to_string()),
            ..self.clone()
        })
    }

    /// Deactivated copy of this state.
    pub fn deactivate(&self, password: Option<&str>) -> Result<Self, GovernanceError> {
        self.check_password(password)?;

        Ok(Self {
            active: false,
            activated_at: None,
            activated_by: None,
            ..self.clone()
        })
    }

    /// Copy of this state with a new password.
    pub fn with_password(&self, password: &str) -> Self {
        Self {
            password_hash: Some(hash_password(password)),
            ..self.clone()
        }
    }

    fn check_password(&self, password: Option<&str>) -> Result<(), GovernanceError> {
        if !self.require_password {
            return Ok(());
        }

        let password = password.ok_or_else(|| {
            GovernanceError::OverrideRejected("password required".to_string())
        })?;
        let stored = self.password_hash.as_deref().ok_or_else(|| {
            GovernanceError::OverrideRejected("no override password configured".to_string())
        })?;

        if !verify_password(password, stored) {
            return Err(GovernanceError::OverrideRejected("invalid password".to_string()));
        }
        Ok(())
    }
}

/// Hash a password into the stored `sha256:<hex>` form.
pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    format!("{}{}", HASH_PREFIX, hex::encode(digest))
}

/// Check `password` against a stored `sha256:<hex>` hash.
pub fn verify_password(password: &str, stored: &str) -> bool {
    if !stored.starts_with(HASH_PREFIX) {
        tracing::error!("override password hash is missing the sha256: prefix");
        return false;
    }

    let computed = hash_password(password);
    constant_time_eq(computed.as_bytes(), stored.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protected() -> EmergencyOverride {
        EmergencyOverride::default().with_password("hunter2")
    }

    #[test]
    fn test_hash_format() {
        let hash = hash_password("hunter2");
        assert!(hash.starts_with("sha256:"));
        assert_eq!(hash.len(), "sha256:".len() + 64);
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn test_verify_rejects_unprefixed_hash() {
        let bare = hash_password("hunter2").trim_start_matches("sha256:").to_string();
        assert!(!verify_password("hunter2", &bare));
    }

    #[test]
    fn test_activate_with_password() {
        let now = Utc::now();
        let state = protected().activate(Some("hunter2"), "admin@192.168.1.2", now).unwrap();
        assert!(state.active);
        assert_eq!(state.activated_at, Some(now));
        assert_eq!(state.activated_by.as_deref(), Some("admin@192.168.1.2"));
        assert!(state.password_hash.is_some());
    }

    #[test]
    fn test_activate_rejects_bad_or_missing_password() {
        let state = protected();
        assert!(matches!(
            state.activate(Some("wrong"), "admin", Utc::now()),
            Err(GovernanceError::OverrideRejected(_))
        ));
        assert!(matches!(
            state.activate(None, "admin", Utc::now()),
            Err(GovernanceError::OverrideRejected(_))
        ));
    }

    #[test]
    fn test_activate_requires_configured_password() {
        let err = EmergencyOverride::default()
            .activate(Some("anything"), "admin", Utc::now())
            .unwrap_err();
        assert!(err.to_string().contains("no override password configured"));
    }

    #[test]
    fn test_password_optional_when_not_required() {
        let state = EmergencyOverride {
            require_password: false,
            ..EmergencyOverride::default()
        };
        assert!(state.activate(None, "admin", Utc::now()).unwrap().active);
    }

    #[test]
    fn test_deactivate_clears_metadata() {
        let active = protected().activate(Some("hunter2"), "admin", Utc::now()).unwrap();
        let cleared = active.deactivate(Some("hunter2")).unwrap();
        assert!(!cleared.active);
        assert!(cleared.activated_at.is_none());
        assert!(cleared.activated_by.is_none());
    }

    #[test]
    fn test_deserialize_enabled_alias() {
        let state: EmergencyOverride = serde_json::from_str(r#"{"enabled": true}"#).unwrap();
        assert!(state.active);
        assert!(state.require_password);
    }
}
