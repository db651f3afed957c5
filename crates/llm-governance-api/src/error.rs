//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use llm_governance_core::GovernanceError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad Request", "BAD_REQUEST"),
            ApiError::Governance(err) => match err {
                GovernanceError::InvalidConfiguration(_) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "Invalid Configuration",
                    "INVALID_CONFIGURATION",
                ),
                GovernanceError::OverrideRejected(_) => {
                    (StatusCode::FORBIDDEN, "Override Rejected", "OVERRIDE_REJECTED")
                }
                GovernanceError::AllowlistEntryNotFound(_) => {
                    (StatusCode::NOT_FOUND, "Not Found", "ALLOWLIST_ENTRY_NOT_FOUND")
                }
                GovernanceError::InvalidTimeFormat(_) | GovernanceError::InvalidRule(_) => {
                    (StatusCode::BAD_REQUEST, "Bad Request", "INVALID_INPUT")
                }
                GovernanceError::Storage(_)
                | GovernanceError::Serialization(_)
                | GovernanceError::AuditUnavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Audit Unavailable",
                    "AUDIT_UNAVAILABLE",
                ),
                GovernanceError::PolicyEvaluation(_) | GovernanceError::PolicyTimeout(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Error",
                    "INTERNAL_ERROR",
                ),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, code) = self.parts();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (
            status,
            Json(json!({
                "error": error,
                "message": self.to_string(),
                "code": code
            })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                ApiError::from(GovernanceError::InvalidConfiguration(vec!["x".into()])),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ApiError::from(GovernanceError::OverrideRejected("bad password".into())),
                StatusCode::FORBIDDEN,
            ),
            (
                ApiError::from(GovernanceError::AllowlistEntryNotFound("10.0.0.1".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(GovernanceError::AuditUnavailable("gone".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (ApiError::BadRequest("nope".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }
}
