//! Editable site copy.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{actions, resource_types, SiteContent, SiteContentResponse, UpdateSiteContentRequest};
use crate::AppState;

use super::audit::audit_log;
use super::auth::AdminUser;
use super::error::ApiError;
use super::validation::validate_content_key;

/// GET /api/site-content/:key
pub async fn get_site_content(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let content = SiteContent::get(&state.db, &key)
        .await?
        .ok_or_else(|| ApiError::not_found("Content not found"))?;

    Ok(Json(json!({
        "ok": true,
        "content": SiteContentResponse::from(content),
    })))
}

/// PUT /api/admin/site-content/:key
pub async fn update_site_content(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    headers: HeaderMap,
    Path(key): Path<String>,
    Json(req): Json<UpdateSiteContentRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_content_key(&key).map_err(|msg| ApiError::validation_field("key", msg))?;

    let content = SiteContent::upsert(&state.db, &key, &req.value, Some(&admin.0.id)).await?;

    audit_log(
        &state,
        &admin,
        &headers,
        actions::SITE_CONTENT_UPDATE,
        resource_types::SITE_CONTENT,
        Some(&key),
        None,
    )
    .await;

    Ok(Json(json!({
        "ok": true,
        "content": SiteContentResponse::from(content),
    })))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::api::test_support::{send, test_state, therapist_login, ADMIN_TOKEN};

    #[tokio::test]
    async fn test_site_content_round_trip_through_admin() {
        let state = test_state().await;

        let (status, body) = send(&state, Method::GET, "/api/site-content/home_hero", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");

        let value = json!({ "title": "Find your therapist", "cta": "Browse" });
        let (status, body) = send(
            &state,
            Method::PUT,
            "/api/admin/site-content/home_hero",
            Some(ADMIN_TOKEN),
            Some(json!({ "value": value })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"]["key"], "home_hero");

        let (status, body) = send(&state, Method::GET, "/api/site-content/home_hero", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"]["value"]["title"], "Find your therapist");

        let (_, logs) = send(
            &state,
            Method::GET,
            "/api/admin/audit-logs?action=site_content.update",
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
        assert_eq!(logs["total"], 1);
    }

    #[tokio::test]
    async fn test_site_content_update_requires_admin_and_valid_key() {
        let state = test_state().await;
        let (token, _) = therapist_login(&state, "Nina Notadmin").await;

        let (status, _) = send(
            &state,
            Method::PUT,
            "/api/admin/site-content/home_hero",
            Some(&token),
            Some(json!({ "value": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &state,
            Method::PUT,
            "/api/admin/site-content/Bad%20Key!",
            Some(ADMIN_TOKEN),
            Some(json!({ "value": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
