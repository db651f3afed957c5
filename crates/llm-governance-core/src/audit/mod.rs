//! Append-only audit trail: event model, SQLite store, writer task and statistics.

mod logger;
mod schema;
mod stats;
mod store;

pub use logger::{AuditLogger, FlushReport, LoggerOptions};
pub use schema::{create_base_schema, migrate, schema_version, CURRENT_SCHEMA_VERSION};
pub use stats::{AuditSummary, DailyStats, Granularity, ModeChangeRecord, PolicyStats, TimelineBucket};
pub use store::AuditStore;

use crate::config::EnforcementMode;
use crate::context::RequestContext;
use crate::engine::{Bypass, EnforcementDecision};
use crate::policy::{PolicyAction, PolicyResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Kind of audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    RequestAllowed,
    RequestAlerted,
    RequestBlocked,
    AllowlistBypass,
    TimeExceptionActive,
    EmergencyOverride,
    ModeChange,
    ConfigChange,
    AllowlistChange,
    EmergencyOverrideActivated,
    EmergencyOverrideDeactivated,
    /// Row written under a type this version does not know. The stored
    /// type is kept in `details.legacy_event_type`.
    Legacy,
}

impl AuditEventType {
    /// Types this version writes. [`AuditEventType::Legacy`] is read-only.
    pub const ALL: [AuditEventType; 11] = [
        AuditEventType::RequestAllowed,
        AuditEventType::RequestAlerted,
        AuditEventType::RequestBlocked,
        AuditEventType::AllowlistBypass,
        AuditEventType::TimeExceptionActive,
        AuditEventType::EmergencyOverride,
        AuditEventType::ModeChange,
        AuditEventType::ConfigChange,
        AuditEventType::AllowlistChange,
        AuditEventType::EmergencyOverrideActivated,
        AuditEventType::EmergencyOverrideDeactivated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::RequestAllowed => "request_allowed",
            AuditEventType::RequestAlerted => "request_alerted",
            AuditEventType::RequestBlocked => "request_blocked",
            AuditEventType::AllowlistBypass => "allowlist_bypass",
            AuditEventType::TimeExceptionActive => "time_exception_active",
            AuditEventType::EmergencyOverride => "emergency_override",
            AuditEventType::ModeChange => "mode_change",
            AuditEventType::ConfigChange => "config_change",
            AuditEventType::AllowlistChange => "allowlist_change",
            AuditEventType::EmergencyOverrideActivated => "emergency_override_activated",
            AuditEventType::EmergencyOverrideDeactivated => "emergency_override_deactivated",
            AuditEventType::Legacy => "legacy",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }

    /// Whether this event records a per-request decision.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            AuditEventType::RequestAllowed
                | AuditEventType::RequestAlerted
                | AuditEventType::RequestBlocked
                | AuditEventType::AllowlistBypass
                | AuditEventType::TimeExceptionActive
                | AuditEventType::EmergencyOverride
        )
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Assigned by the store; `None` until persisted.
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub client_ip: Option<String>,
    pub endpoint: Option<String>,
    pub device_id: Option<String>,
    pub enforcement_action: Option<PolicyAction>,
    pub override_user: Option<String>,
    pub allowlist_reason: Option<String>,
    pub policy_name: Option<String>,
    pub details: serde_json::Value,
}

impl AuditEvent {
    fn new(event_type: AuditEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            timestamp,
            event_type,
            client_ip: None,
            endpoint: None,
            device_id: None,
            enforcement_action: None,
            override_user: None,
            allowlist_reason: None,
            policy_name: None,
            details: json!({}),
        }
    }

    /// Record of a request decision.
    pub fn from_decision(
        context: &RequestContext,
        decision: &EnforcementDecision,
        results: &[PolicyResult],
    ) -> Self {
        let matched: Vec<_> = results
            .iter()
            .filter(|r| r.matched)
            .map(|r| {
                json!({
                    "policy": r.policy_name,
                    "proposed_action": r.proposed_action,
                    "reason": r.reason,
                })
            })
            .collect();

        let mut event = Self::new(
            decision.audit_event_type(),
            decision.timestamp.with_timezone(&Utc),
        );
        event.client_ip = Some(context.client_ip().to_string());
        event.endpoint = Some(context.endpoint().to_string());
        event.device_id = context.device_id().map(str::to_string);
        event.enforcement_action = Some(decision.action_taken);
        event.policy_name = decision.policy_name.clone();
        event.details = json!({
            "reason": decision.reason,
            "mode": decision.mode,
            "should_block": decision.should_block,
            "allow_override": decision.allow_override,
            "method": context.method(),
            "path": context.path(),
            "requests_today": context.requests_today(),
            "matched_policies": matched,
        });

        match &decision.bypass {
            Some(Bypass::EmergencyOverride { activated_by }) => {
                event.override_user = activated_by.clone();
            }
            Some(Bypass::Allowlist { .. }) | Some(Bypass::TimeException { .. }) => {
                event.allowlist_reason = Some(decision.reason.clone());
            }
            None => {}
        }

        event
    }

    pub fn mode_change(
        from: EnforcementMode,
        to: EnforcementMode,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Self {
        let mut event = Self::new(AuditEventType::ModeChange, at);
        event.override_user = Some(actor.to_string());
        event.details = json!({ "from": from, "to": to });
        event
    }

    pub fn config_change(summary: &str, changes: serde_json::Value, actor: &str, at: DateTime<Utc>) -> Self {
        let mut event = Self::new(AuditEventType::ConfigChange, at);
        event.override_user = Some(actor.to_string());
        event.details = json!({ "summary": summary, "changes": changes });
        event
    }

    /// `operation` is `add` or `remove`.
    pub fn allowlist_change(
        operation: &str,
        device_ip: &str,
        device_name: &str,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Self {
        let mut event = Self::new(AuditEventType::AllowlistChange, at);
        event.client_ip = Some(device_ip.to_string());
        event.override_user = Some(actor.to_string());
        event.allowlist_reason = Some(format!("{} {}", operation, device_name));
        event.details = json!({ "operation": operation, "ip": device_ip, "name": device_name });
        event
    }

    pub fn emergency_override_toggled(active: bool, actor: &str, at: DateTime<Utc>) -> Self {
        let event_type = if active {
            AuditEventType::EmergencyOverrideActivated
        } else {
            AuditEventType::EmergencyOverrideDeactivated
        };
        let mut event = Self::new(event_type, at);
        event.override_user = Some(actor.to_string());
        event.details = json!({ "active": active });
        event
    }
}

/// Half-open time range `[start, end)`; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// The `hours` before `now`.
    pub fn last_hours(hours: i64, now: DateTime<Utc>) -> Self {
        Self::between(now - Duration::hours(hours), now)
    }
}

/// Filter for the read surface. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventFilter {
    #[serde(flatten)]
    pub range: TimeRange,
    pub event_type: Option<AuditEventType>,
    pub client_ip: Option<String>,
    pub policy_name: Option<String>,
    pub action: Option<PolicyAction>,
}

impl EventFilter {
    pub fn in_range(range: TimeRange) -> Self {
        Self {
            range,
            ..Default::default()
        }
    }
}
