//! Route configuration

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::time::Duration;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::handlers::{self, admin, audit};
use crate::middleware::operator_middleware;
use crate::state::AppState;

const MAX_BODY_BYTES: usize = 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Create the application router
///
/// ## Routes
/// - GET /health, /health/ready, /health/live, /version - probes
/// - POST /v1/decide - govern one intercepted request
/// - /v1/audit/* - audit read surface (operator token)
/// - /v1/admin/* - configuration and emergency controls (operator token)
///
/// Probes and the decision route are not guarded; they are reached from the
/// interception layer on the local network.
pub fn create_router(state: AppState) -> Router {
    let audit_routes = Router::new()
        .route("/v1/audit/summary", get(audit::summary))
        .route("/v1/audit/recent", get(audit::recent))
        .route("/v1/audit/top-policies", get(audit::top_policies))
        .route("/v1/audit/timeline", get(audit::timeline))
        .route("/v1/audit/daily", get(audit::daily))
        .route("/v1/audit/mode-history", get(audit::mode_history));

    let admin_routes = Router::new()
        .route("/v1/admin/config", get(admin::get_config).put(admin::replace_config))
        .route("/v1/admin/consent-warning", get(admin::consent_warning))
        .route("/v1/admin/mode", post(admin::set_mode))
        .route("/v1/admin/consent", post(admin::set_consent))
        .route("/v1/admin/enabled", post(admin::set_enabled))
        .route("/v1/admin/policies", get(admin::list_policies))
        .route("/v1/admin/policies/:name", put(admin::set_policy_action))
        .route("/v1/admin/rules", put(admin::replace_rules))
        .route("/v1/admin/time-exceptions", put(admin::set_time_exceptions))
        .route("/v1/admin/allowlist", post(admin::add_allowlist_device))
        .route("/v1/admin/allowlist/:ip", delete(admin::remove_allowlist_device))
        .route("/v1/admin/emergency/password", post(admin::set_override_password))
        .route("/v1/admin/emergency/activate", post(admin::activate_emergency))
        .route("/v1/admin/emergency/deactivate", post(admin::deactivate_emergency))
        .route(
            "/v1/admin/validate",
            get(admin::validate_current).post(admin::validate),
        );

    let guarded = audit_routes
        .merge(admin_routes)
        .layer(middleware::from_fn_with_state(state.clone(), operator_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/health/ready", get(handlers::ready))
        .route("/health/live", get(handlers::live))
        .route("/version", get(handlers::version))
        .route("/v1/decide", post(handlers::decide))
        .merge(guarded)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
