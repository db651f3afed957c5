//! # LLM-Governance-Core
//!
//! Turns one intercepted LLM request into an auditable allow/alert/block
//! decision, gated by explicit operator consent.
//!
//! ## Overview
//!
//! - **PolicyEvaluator**: runs every enabled policy predicate under a bounded
//!   timeout; a failing predicate counts as "no match" for that policy only
//! - **EnforcementEngine**: pure, total decision function combining policy
//!   results, mode, consent, allowlist, time exceptions and emergency override
//! - **ConsentValidator**: gate every configuration passes before going live
//! - **AuditLogger**: non-blocking, insert-only SQLite audit trail with
//!   aggregation queries
//!
//! Blocking is only possible when `mode = enforce`, `enabled` and
//! `consent_accepted` all hold, the winning policy is configured to `block`,
//! and no bypass applies.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use llm_governance_core::{Governor, PolicyRule, RequestContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rules: Vec<PolicyRule> = serde_json::from_str(
//!         r#"[{"name": "bedtime", "action": "block", "hours": {"start": 21, "end": 7}}]"#,
//!     )?;
//!
//!     let governor = Governor::builder()
//!         .policies(llm_governance_core::compile_rules(&rules)?)
//!         .build()?;
//!
//!     let context = RequestContext::new("192.168.1.20", "api.openai.com", chrono::Local::now().fixed_offset());
//!     let decision = governor.process(context).await;
//!     println!("{:?} ({})", decision.action_taken, decision.reason);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Predicates
//!
//! ```rust,ignore
//! use llm_governance_core::{Evaluable, GovernanceError, PolicyMatch, RequestContext};
//! use async_trait::async_trait;
//!
//! struct NoLateNights;
//!
//! #[async_trait]
//! impl Evaluable for NoLateNights {
//!     async fn evaluate(&self, context: &RequestContext) -> Result<PolicyMatch, GovernanceError> {
//!         Ok(if context.hour() >= 23 {
//!             PolicyMatch::hit("after 23:00")
//!         } else {
//!             PolicyMatch::miss()
//!         })
//!     }
//! }
//! ```

pub mod allowlist;
pub mod audit;
pub mod config;
pub mod consent;
pub mod context;
pub mod emergency;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod governor;
pub mod policy;
pub mod rules;
pub mod time_exception;

pub use allowlist::{Allowlist, AllowlistDevice, AllowlistGroup, AllowlistMatch};
pub use audit::{AuditEvent, AuditEventType, AuditLogger, AuditStore, EventFilter, Granularity, TimeRange};
pub use config::{ConfigHandle, EnforcementConfig, EnforcementMode, PolicyOverride};
pub use consent::{ConsentReport, ConsentValidator};
pub use context::{DeviceCounters, RequestContext};
pub use emergency::EmergencyOverride;
pub use engine::{Bypass, EnforcementDecision, EnforcementEngine};
pub use error::GovernanceError;
pub use evaluator::PolicyEvaluator;
pub use governor::{Governor, GovernorBuilder};
pub use policy::{Evaluable, FnPredicate, PolicyAction, PolicyDefinition, PolicyMatch, PolicyResult};
pub use rules::{compile_rules, PolicyRule, RulePredicate, RuleSpec};
pub use time_exception::TimeException;
