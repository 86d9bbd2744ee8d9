//! Admin audit trail.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde_json::Value;
use std::sync::Arc;

use crate::db::{list_audit_logs, log_audit, AuditLogQuery};
use crate::AppState;

use super::auth::AdminUser;
use super::error::ApiError;
use super::{page_body, rate_limit};

/// Record an admin action. A failed write is logged and does not fail the request.
pub async fn audit_log(
    state: &AppState,
    admin: &AdminUser,
    headers: &HeaderMap,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    details: Option<Value>,
) {
    let ip = rate_limit::extract_client_ip(headers).to_string();
    let result = log_audit(
        &state.db,
        Some(&admin.0.id),
        action,
        resource_type,
        resource_id,
        Some(&ip),
        details,
    )
    .await;

    if let Err(e) = result {
        tracing::warn!(action, resource_type, error = %e, "Failed to write audit log");
    }
}

/// GET /api/admin/audit-logs
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = list_audit_logs(&state.db, &query).await?;
    Ok(page_body(page))
}
