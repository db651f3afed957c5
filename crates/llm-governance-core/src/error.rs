//! Error types for the governance core.

use std::time::Duration;

/// Errors that can occur at the configuration, policy and audit boundaries.
///
/// The decision path itself never produces one of these: `decide()` and
/// `ConsentValidator::validate()` are total.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    /// Configuration rejected by the consent validator.
    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfiguration(Vec<String>),

    /// Emergency override activation or deactivation refused.
    #[error("Emergency override rejected: {0}")]
    OverrideRejected(String),

    /// A policy predicate returned an error.
    #[error("Policy evaluation failed: {0}")]
    PolicyEvaluation(String),

    /// A policy predicate did not finish within its evaluation budget.
    #[error("Policy evaluation timed out after {0:?}")]
    PolicyTimeout(Duration),

    /// A declarative rule could not be compiled.
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Clock value not in 24-hour `HH:MM` form.
    #[error("Invalid time format: {0} (expected HH:MM, 24-hour)")]
    InvalidTimeFormat(String),

    /// No allowlist entry matches the given address.
    #[error("Allowlist entry not found: {0}")]
    AllowlistEntryNotFound(String),

    /// Error from the audit database.
    #[error("Audit storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Error encoding or decoding audit payloads.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The audit writer task is gone or its storage lock is poisoned.
    #[error("Audit logger unavailable: {0}")]
    AuditUnavailable(String),
}
