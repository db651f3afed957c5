//! Decision endpoint called by the interception layer

use axum::{extract::State, Json};
use chrono::{DateTime, FixedOffset, Local};
use llm_governance_core::{EnforcementDecision, RequestContext};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// One intercepted request.
#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    pub client_ip: String,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Destination host, e.g. `api.openai.com`.
    pub endpoint: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub prompt_summary: Option<String>,
    /// Local wall-clock time of the request; defaults to now.
    #[serde(default)]
    pub timestamp: Option<DateTime<FixedOffset>>,
}

impl DecideRequest {
    fn into_context(self) -> Result<RequestContext, ApiError> {
        if self.client_ip.trim().is_empty() {
            return Err(ApiError::BadRequest("client_ip must not be empty".to_string()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(ApiError::BadRequest("endpoint must not be empty".to_string()));
        }

        let timestamp = self.timestamp.unwrap_or_else(|| Local::now().fixed_offset());
        let mut context = RequestContext::new(self.client_ip, self.endpoint, timestamp);
        if let Some(device_id) = self.device_id {
            context = context.with_device(device_id);
        }
        if self.method.is_some() || self.path.is_some() {
            context = context.with_request_line(
                self.method.unwrap_or_else(|| "POST".to_string()),
                self.path.unwrap_or_else(|| "/".to_string()),
            );
        }
        if let Some(summary) = self.prompt_summary {
            context = context.with_prompt_summary(summary);
        }
        Ok(context)
    }
}

/// POST /v1/decide
pub async fn decide(
    State(state): State<AppState>,
    Json(request): Json<DecideRequest>,
) -> ApiResult<Json<EnforcementDecision>> {
    let context = request.into_context()?;
    Ok(Json(state.governor.process(context).await))
}
