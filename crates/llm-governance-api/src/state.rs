//! Shared application state.

use llm_governance_core::Governor;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub governor: Arc<Governor>,
    pub operator_auth: Option<OperatorAuth>,
}

/// Operator token verification settings.
#[derive(Clone)]
pub struct OperatorAuth {
    pub secret: Arc<str>,
    pub ttl_seconds: i64,
}

impl AppState {
    pub fn new(governor: Arc<Governor>) -> Self {
        Self {
            governor,
            operator_auth: None,
        }
    }

    pub fn with_operator_secret(mut self, secret: &str, ttl_seconds: i64) -> Self {
        self.operator_auth = Some(OperatorAuth {
            secret: Arc::from(secret),
            ttl_seconds,
        });
        self
    }
}
