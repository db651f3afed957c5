//! # LLM-Governance-API
//!
//! HTTP surface for the governance pipeline: the decision endpoint called by
//! the interception layer, the audit read surface and operator controls.
//!
//! Admin and audit routes require an HMAC-signed operator token; without an
//! operator secret they are refused.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod operator_token;
pub mod router;
pub mod settings;
pub mod state;

pub use router::create_router;
pub use settings::ServiceSettings;
pub use state::AppState;
