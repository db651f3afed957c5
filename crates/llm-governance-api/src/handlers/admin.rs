//! Operator controls.
//!
//! Every mutation runs through the governor, so the consent gate and the
//! audit trail apply exactly as they do in-process. The acting operator is
//! taken from the validated operator token.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use llm_governance_core::{
    compile_rules, AllowlistDevice, ConsentReport, ConsentValidator, EnforcementConfig, EnforcementMode,
    GovernanceError, PolicyAction, PolicyRule, TimeException,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::middleware::Operator;
use crate::state::AppState;

/// Serialize a configuration with the override password digest removed.
pub fn config_view(config: &EnforcementConfig) -> Result<Value, GovernanceError> {
    let mut value = serde_json::to_value(config)?;
    if let Some(emergency) = value
        .get_mut("emergency_override")
        .and_then(Value::as_object_mut)
    {
        emergency.remove("password_hash");
        emergency.insert(
            "password_configured".to_string(),
            Value::Bool(config.emergency_override.password_hash.is_some()),
        );
    }
    Ok(value)
}

fn respond(config: &EnforcementConfig) -> ApiResult<Json<Value>> {
    Ok(Json(config_view(config)?))
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: EnforcementMode,
}

#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    pub accepted: bool,
}

#[derive(Debug, Deserialize)]
pub struct EnabledRequest {
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct PolicyActionRequest {
    pub action: PolicyAction,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct PasswordRequest {
    #[serde(default)]
    pub password: Option<String>,
}

/// GET /v1/admin/config
pub async fn get_config(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    respond(&state.governor.config())
}

/// PUT /v1/admin/config
pub async fn replace_config(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Json(config): Json<EnforcementConfig>,
) -> ApiResult<Json<Value>> {
    let change = state.governor.replace_config(config, &operator.operator_id)?;
    respond(&change.current)
}

/// GET /v1/admin/consent-warning
pub async fn consent_warning() -> Json<Value> {
    Json(json!({ "warning": ConsentValidator::consent_warning() }))
}

/// POST /v1/admin/mode
pub async fn set_mode(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Json(request): Json<ModeRequest>,
) -> ApiResult<Json<Value>> {
    state.governor.set_mode(request.mode, &operator.operator_id)?;
    respond(&state.governor.config())
}

/// POST /v1/admin/consent
pub async fn set_consent(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Json(request): Json<ConsentRequest>,
) -> ApiResult<Json<Value>> {
    let change = state.governor.set_consent(request.accepted, &operator.operator_id)?;
    respond(&change.current)
}

/// POST /v1/admin/enabled
pub async fn set_enabled(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Json(request): Json<EnabledRequest>,
) -> ApiResult<Json<Value>> {
    let change = state
        .governor
        .set_enforcement_enabled(request.enabled, &operator.operator_id)?;
    respond(&change.current)
}

/// GET /v1/admin/policies
///
/// Loaded policies with the action each one takes under the live configuration.
pub async fn list_policies(State(state): State<AppState>) -> Json<Value> {
    let config = state.governor.config();
    let policies: Vec<Value> = state
        .governor
        .policies()
        .iter()
        .map(|policy| {
            json!({
                "name": policy.name,
                "enabled": policy.enabled,
                "proposed_action": policy.action,
                "configured_action": config.policy_action(&policy.name),
            })
        })
        .collect();
    Json(json!({ "policies": policies }))
}

/// PUT /v1/admin/policies/:name
pub async fn set_policy_action(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Path(name): Path<String>,
    Json(request): Json<PolicyActionRequest>,
) -> ApiResult<Json<Value>> {
    let change = state.governor.set_policy_action(
        &name,
        request.action,
        request.enabled,
        &operator.operator_id,
    )?;
    respond(&change.current)
}

/// PUT /v1/admin/rules
///
/// Replace the rule set. Nothing is swapped in unless every rule compiles.
pub async fn replace_rules(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Json(rules): Json<Vec<PolicyRule>>,
) -> ApiResult<Json<Value>> {
    let policies = compile_rules(&rules)?;
    let count = policies.len();
    state.governor.replace_policies(policies, &operator.operator_id);
    Ok(Json(json!({ "policies": count })))
}

/// PUT /v1/admin/time-exceptions
pub async fn set_time_exceptions(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Json(exceptions): Json<Vec<TimeException>>,
) -> ApiResult<Json<Value>> {
    let change = state
        .governor
        .set_time_exceptions(exceptions, &operator.operator_id)?;
    respond(&change.current)
}

/// POST /v1/admin/allowlist
pub async fn add_allowlist_device(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Json(device): Json<AllowlistDevice>,
) -> ApiResult<Json<Value>> {
    let change = state
        .governor
        .add_allowlist_device(device, &operator.operator_id)?;
    respond(&change.current)
}

/// DELETE /v1/admin/allowlist/:ip
pub async fn remove_allowlist_device(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Path(ip): Path<String>,
) -> ApiResult<Json<Value>> {
    let change = state
        .governor
        .remove_allowlist_device(&ip, &operator.operator_id)?;
    respond(&change.current)
}

/// POST /v1/admin/emergency/password
pub async fn set_override_password(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Json(request): Json<PasswordRequest>,
) -> ApiResult<Json<Value>> {
    let password = request
        .password
        .filter(|p| !p.is_empty())
        .ok_or_else(|| crate::error::ApiError::BadRequest("password must not be empty".to_string()))?;
    let change = state
        .governor
        .set_override_password(&password, &operator.operator_id)?;
    respond(&change.current)
}

/// POST /v1/admin/emergency/activate
pub async fn activate_emergency(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Json(request): Json<PasswordRequest>,
) -> ApiResult<Json<Value>> {
    let change = state
        .governor
        .activate_emergency_override(request.password.as_deref(), &operator.operator_id)?;
    respond(&change.current)
}

/// POST /v1/admin/emergency/deactivate
pub async fn deactivate_emergency(
    State(state): State<AppState>,
    Extension(operator): Extension<Operator>,
    Json(request): Json<PasswordRequest>,
) -> ApiResult<Json<Value>> {
    let change = state
        .governor
        .deactivate_emergency_override(request.password.as_deref(), &operator.operator_id)?;
    respond(&change.current)
}

/// POST /v1/admin/validate
///
/// Dry run: report on a candidate configuration without applying it.
pub async fn validate(Json(config): Json<EnforcementConfig>) -> Json<ConsentReport> {
    Json(ConsentValidator::validate(&config))
}

/// GET /v1/admin/validate
pub async fn validate_current(State(state): State<AppState>) -> Json<ConsentReport> {
    Json(state.governor.validate_current())
}
