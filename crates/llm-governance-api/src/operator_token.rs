//! Operator token creation and validation using HMAC-SHA256.
//!
//! Admin and audit routes require a token signed with the service's operator
//! secret. The signature covers `operator_id|issued_at`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TTL_SECONDS: i64 = 300;
const MAX_CLOCK_SKEW_SECONDS: i64 = 30;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid operator token: {0}")]
    Invalid(String),

    #[error("Expired operator token: {0}")]
    Expired(String),
}

impl TokenError {
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Invalid(_) => "INVALID_OPERATOR_TOKEN",
            TokenError::Expired(_) => "EXPIRED_OPERATOR_TOKEN",
        }
    }
}

/// HMAC-signed operator identity. The `operator_id` becomes the actor on
/// every audited configuration change.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OperatorToken {
    pub operator_id: String,
    /// Hex-encoded HMAC-SHA256 of `operator_id|issued_at`.
    pub signature: String,
    /// RFC 3339.
    pub issued_at: String,
}

impl OperatorToken {
    /// Sign a token for `operator_id` issued now.
    pub fn create(operator_id: &str, secret: &str) -> Result<Self, TokenError> {
        Self::create_at(operator_id, secret, Utc::now())
    }

    pub fn create_at(operator_id: &str, secret: &str, issued_at: DateTime<Utc>) -> Result<Self, TokenError> {
        if operator_id.is_empty() {
            return Err(TokenError::Invalid("operator_id must not be empty".to_string()));
        }
        if secret.is_empty() {
            return Err(TokenError::Invalid("secret must not be empty".to_string()));
        }

        let issued_at = issued_at.to_rfc3339();
        let signature = hex::encode(mac_for(operator_id, &issued_at, secret)?.finalize().into_bytes());

        Ok(Self {
            operator_id: operator_id.to_string(),
            signature,
            issued_at,
        })
    }

    /// Check the signature, then the age against `ttl_seconds`.
    pub fn validate(&self, secret: &str, ttl_seconds: i64) -> Result<(), TokenError> {
        if self.operator_id.is_empty() || self.signature.is_empty() || self.issued_at.is_empty() {
            return Err(TokenError::Invalid("operator_id, signature and issued_at are required".to_string()));
        }

        let sig_bytes = hex::decode(&self.signature)
            .map_err(|_| TokenError::Invalid("signature is not valid hex".to_string()))?;

        // verify_slice compares in constant time
        mac_for(&self.operator_id, &self.issued_at, secret)?
            .verify_slice(&sig_bytes)
            .map_err(|_| TokenError::Invalid("signature mismatch".to_string()))?;

        let issued_at = DateTime::parse_from_rfc3339(&self.issued_at)
            .map_err(|_| TokenError::Invalid("issued_at is not RFC 3339".to_string()))?;
        let age = Utc::now().signed_duration_since(issued_at).num_seconds();

        if age > ttl_seconds {
            return Err(TokenError::Expired(format!("age: {}s, TTL: {}s", age, ttl_seconds)));
        }
        if age < -MAX_CLOCK_SKEW_SECONDS {
            return Err(TokenError::Invalid("issued_at is in the future".to_string()));
        }
        Ok(())
    }
}

fn mac_for(operator_id: &str, issued_at: &str, secret: &str) -> Result<HmacSha256, TokenError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| TokenError::Invalid(format!("HMAC error: {}", e)))?;
    mac.update(format!("{}|{}", operator_id, issued_at).as_bytes());
    Ok(mac)
}
