//! Operator token middleware.
//!
//! Guards the admin and audit routes. Fails closed: when no operator secret
//! is configured every guarded request is refused with 503.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::operator_token::OperatorToken;
use crate::state::AppState;

pub const OPERATOR_ID_HEADER: &str = "x-operator-id";
pub const OPERATOR_SIGNATURE_HEADER: &str = "x-operator-signature";
pub const OPERATOR_ISSUED_AT_HEADER: &str = "x-operator-issued-at";

/// Authenticated operator, added to request extensions after validation.
#[derive(Debug, Clone)]
pub struct Operator {
    pub operator_id: String,
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

fn unauthorized(error: &str, message: String, code: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": error,
            "message": message,
            "code": code
        })),
    )
        .into_response()
}

pub async fn operator_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let Some(auth) = state.operator_auth.as_ref() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "Operator Auth Disabled",
                "message": "No operator secret is configured; admin and audit routes are unavailable.",
                "code": "OPERATOR_AUTH_DISABLED"
            })),
        )
            .into_response();
    };

    let token = OperatorToken {
        operator_id: header(request.headers(), OPERATOR_ID_HEADER),
        signature: header(request.headers(), OPERATOR_SIGNATURE_HEADER),
        issued_at: header(request.headers(), OPERATOR_ISSUED_AT_HEADER),
    };

    if token.operator_id.is_empty() || token.signature.is_empty() || token.issued_at.is_empty() {
        return unauthorized(
            "Missing Operator Token",
            "Provide x-operator-id, x-operator-signature and x-operator-issued-at headers.".to_string(),
            "OPERATOR_TOKEN_REQUIRED",
        );
    }

    if let Err(err) = token.validate(&auth.secret, auth.ttl_seconds) {
        tracing::warn!(operator = %token.operator_id, error = %err, "operator token rejected");
        return unauthorized("Invalid Operator Token", err.to_string(), err.code());
    }

    request.extensions_mut().insert(Operator {
        operator_id: token.operator_id,
    });

    next.run(request).await
}
