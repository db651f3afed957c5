//! Audit read surface

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use llm_governance_core::audit::{AuditSummary, DailyStats, ModeChangeRecord, PolicyStats, TimelineBucket};
use llm_governance_core::{AuditEvent, AuditEventType, EventFilter, Granularity, PolicyAction, TimeRange};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1_000;

/// Query string shared by the audit routes.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuditQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Shorthand for `start = now - hours`.
    pub hours: Option<i64>,
    pub event_type: Option<AuditEventType>,
    pub client_ip: Option<String>,
    pub policy_name: Option<String>,
    pub action: Option<PolicyAction>,
    pub limit: Option<usize>,
    pub granularity: Option<Granularity>,
}

impl AuditQuery {
    fn range(&self) -> Result<TimeRange, ApiError> {
        let range = match self.hours {
            Some(hours) if hours <= 0 => {
                return Err(ApiError::BadRequest("hours must be positive".to_string()));
            }
            Some(hours) => TimeRange::last_hours(hours, Utc::now()),
            None => TimeRange {
                start: self.start,
                end: self.end,
            },
        };
        if let (Some(start), Some(end)) = (range.start, range.end) {
            if start > end {
                return Err(ApiError::BadRequest("start must not be after end".to_string()));
            }
        }
        Ok(range)
    }

    fn filter(&self) -> Result<EventFilter, ApiError> {
        Ok(EventFilter {
            event_type: self.event_type,
            client_ip: self.client_ip.clone(),
            policy_name: self.policy_name.clone(),
            action: self.action,
            ..EventFilter::in_range(self.range()?)
        })
    }

    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// GET /v1/audit/summary
pub async fn summary(State(state): State<AppState>, Query(query): Query<AuditQuery>) -> ApiResult<Json<AuditSummary>> {
    Ok(Json(state.governor.audit().summary(query.range()?).await?))
}

/// GET /v1/audit/recent
pub async fn recent(State(state): State<AppState>, Query(query): Query<AuditQuery>) -> ApiResult<Json<Vec<AuditEvent>>> {
    let limit = query.limit();
    Ok(Json(state.governor.audit().recent(query.filter()?, limit).await?))
}

/// GET /v1/audit/top-policies
pub async fn top_policies(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<PolicyStats>>> {
    let limit = query.limit.unwrap_or(10).clamp(1, MAX_LIMIT);
    Ok(Json(state.governor.audit().top_policies(query.range()?, limit).await?))
}

/// GET /v1/audit/timeline
pub async fn timeline(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<TimelineBucket>>> {
    let granularity = query.granularity.unwrap_or_default();
    Ok(Json(state.governor.audit().timeline(query.filter()?, granularity).await?))
}

/// GET /v1/audit/daily
pub async fn daily(State(state): State<AppState>, Query(query): Query<AuditQuery>) -> ApiResult<Json<Vec<DailyStats>>> {
    Ok(Json(state.governor.audit().daily_stats(query.range()?).await?))
}

/// GET /v1/audit/mode-history
pub async fn mode_history(State(state): State<AppState>) -> ApiResult<Json<Vec<ModeChangeRecord>>> {
    Ok(Json(state.governor.audit().mode_history().await?))
}
