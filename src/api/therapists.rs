//! Therapist directory: public search and profiles, admin management and
//! the therapist's own profile.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    actions, resource_types, AdminTherapistQuery, CreateTherapistRequest, MatchEvent,
    MatchEventType, Pagination, PublicTherapist, Therapist, TherapistResponse,
    TherapistSearchQuery, TherapistStatus, UpdateTherapistRequest, UpdateTherapistStatusRequest,
};
use crate::AppState;

use super::audit::audit_log;
use super::auth::{AdminUser, TherapistUser};
use super::error::ApiError;
use super::page_body;
use super::validation::{
    validate_create_therapist, validate_modality, validate_update_therapist,
};

fn parse_status(status: &str) -> Result<TherapistStatus, ApiError> {
    TherapistStatus::from_str(status).ok_or_else(|| {
        ApiError::validation_field(
            "status",
            "Status must be one of: pending, active, suspended, inactive",
        )
    })
}

/// Filters echoed into the match event so impressions can be tied to a search
fn search_summary(query: &TherapistSearchQuery) -> Value {
    json!({
        "q": query.q,
        "city": query.city,
        "modality": query.modality,
        "specialty": query.specialty,
        "language": query.language,
        "max_price_cents": query.max_price_cents,
    })
}

/// GET /api/therapists
pub async fn search_therapists(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TherapistSearchQuery>,
) -> Result<Json<Value>, ApiError> {
    validate_modality(&query.modality).map_err(|e| ApiError::validation_field("modality", e))?;

    let page = Therapist::search(&state.db, &query).await?;

    let summary = search_summary(&query);
    for therapist in &page.items {
        if let Err(e) = MatchEvent::record(
            &state.db,
            &therapist.id,
            MatchEventType::SearchImpression,
            Some(&summary),
        )
        .await
        {
            tracing::warn!(therapist_id = %therapist.id, error = %e, "Failed to record search impression");
        }
    }

    Ok(page_body(page.map(PublicTherapist::from)))
}

/// GET /api/therapists/:slug
pub async fn get_public_profile(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let therapist = Therapist::find_by_slug(&state.db, &slug)
        .await?
        .filter(|t| t.is_active())
        .ok_or_else(|| ApiError::not_found("Therapist not found"))?;

    if let Err(e) =
        MatchEvent::record(&state.db, &therapist.id, MatchEventType::ProfileView, None).await
    {
        tracing::warn!(therapist_id = %therapist.id, error = %e, "Failed to record profile view");
    }

    Ok(Json(json!({
        "ok": true,
        "therapist": PublicTherapist::from(therapist),
    })))
}

/// GET /api/admin/therapists
pub async fn list_therapists(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<AdminTherapistQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let pagination = Pagination {
        page: query.page,
        per_page: query.per_page,
    };

    let page = Therapist::list(&state.db, status, &pagination).await?;
    Ok(page_body(page.map(TherapistResponse::from)))
}

/// POST /api/admin/therapists
pub async fn create_therapist(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    headers: HeaderMap,
    Json(req): Json<CreateTherapistRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_create_therapist(&req)?;
    if let Some(status) = &req.status {
        parse_status(status)?;
    }

    let therapist = {
        let mut conn = state.db.acquire().await?;
        Therapist::insert(&mut conn, &req, None).await?
    };

    tracing::info!(therapist_id = %therapist.id, slug = %therapist.slug, "Therapist created");

    audit_log(
        &state,
        &admin,
        &headers,
        actions::THERAPIST_CREATE,
        resource_types::THERAPIST,
        Some(&therapist.id),
        Some(json!({ "full_name": therapist.full_name, "email": therapist.email })),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "therapist": TherapistResponse::from(therapist) })),
    ))
}

/// GET /api/admin/therapists/:id
pub async fn get_therapist(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let therapist = Therapist::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Therapist not found"))?;

    Ok(Json(json!({ "ok": true, "therapist": TherapistResponse::from(therapist) })))
}

/// PUT /api/admin/therapists/:id
pub async fn update_therapist(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateTherapistRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_update_therapist(&req)?;

    if Therapist::find_by_id(&state.db, &id).await?.is_none() {
        return Err(ApiError::not_found("Therapist not found"));
    }

    let therapist = Therapist::update(&state.db, &id, &req, true).await?;

    audit_log(
        &state,
        &admin,
        &headers,
        actions::THERAPIST_UPDATE,
        resource_types::THERAPIST,
        Some(&id),
        None,
    )
    .await;

    Ok(Json(json!({ "ok": true, "therapist": TherapistResponse::from(therapist) })))
}

/// DELETE /api/admin/therapists/:id
pub async fn delete_therapist(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !Therapist::delete(&state.db, &id).await? {
        return Err(ApiError::not_found("Therapist not found"));
    }

    tracing::info!(therapist_id = %id, "Therapist deleted");

    audit_log(
        &state,
        &admin,
        &headers,
        actions::THERAPIST_DELETE,
        resource_types::THERAPIST,
        Some(&id),
        None,
    )
    .await;

    Ok(Json(json!({ "ok": true })))
}

/// POST /api/admin/therapists/:id/status
pub async fn set_therapist_status(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<UpdateTherapistStatusRequest>,
) -> Result<Json<Value>, ApiError> {
    let status = parse_status(&req.status)?;

    let existing = Therapist::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Therapist not found"))?;

    Therapist::set_status(&state.db, &id, status).await?;

    tracing::info!(therapist_id = %id, from = %existing.status, to = %status, "Therapist status changed");

    audit_log(
        &state,
        &admin,
        &headers,
        actions::THERAPIST_STATUS,
        resource_types::THERAPIST,
        Some(&id),
        Some(json!({ "from": existing.status, "to": status })),
    )
    .await;

    let therapist = Therapist::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Therapist not found"))?;
    Ok(Json(json!({ "ok": true, "therapist": TherapistResponse::from(therapist) })))
}

/// GET /api/me/profile
pub async fn get_own_profile(caller: TherapistUser) -> Json<Value> {
    Json(json!({
        "ok": true,
        "therapist": TherapistResponse::from(caller.therapist),
    }))
}

/// PUT /api/me/profile
pub async fn update_own_profile(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Json(req): Json<UpdateTherapistRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_update_therapist(&req)?;

    let therapist = Therapist::update(&state.db, &caller.therapist.id, &req, false).await?;
    tracing::debug!(therapist_id = %therapist.id, "Therapist updated own profile");

    Ok(Json(json!({ "ok": true, "therapist": TherapistResponse::from(therapist) })))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::api::test_support::{send, test_state, therapist_login, ADMIN_TOKEN};
    use crate::db::{insert_test_therapist, TherapistMetrics, MetricsRangeQuery, TherapistStatus};

    #[tokio::test]
    async fn test_public_search_hides_inactive_and_counts_impressions() {
        let state = test_state().await;
        let active = insert_test_therapist(&state.db, "Ana Active", TherapistStatus::Active).await;
        insert_test_therapist(&state.db, "Sam Suspended", TherapistStatus::Suspended).await;

        let (status, body) = send(&state, Method::GET, "/api/therapists", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["slug"], "ana-active");
        assert!(body["items"][0].get("email").is_none());

        let metrics = TherapistMetrics::list_for_therapist(&state.db, &active.id, &MetricsRangeQuery::default())
            .await
            .unwrap();
        assert_eq!(metrics.search_impressions, 1);
    }

    #[tokio::test]
    async fn test_public_profile_only_for_active() {
        let state = test_state().await;
        let active = insert_test_therapist(&state.db, "Pia Profile", TherapistStatus::Active).await;
        insert_test_therapist(&state.db, "Pat Pending", TherapistStatus::Pending).await;

        let (status, body) =
            send(&state, Method::GET, &format!("/api/therapists/{}", active.slug), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["therapist"]["full_name"], "Pia Profile");

        let (status, _) = send(&state, Method::GET, "/api/therapists/pat-pending", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let metrics = TherapistMetrics::list_for_therapist(&state.db, &active.id, &MetricsRangeQuery::default())
            .await
            .unwrap();
        assert_eq!(metrics.profile_views, 1);
    }

    #[tokio::test]
    async fn test_admin_create_validates_and_audits() {
        let state = test_state().await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/admin/therapists",
            Some(ADMIN_TOKEN),
            Some(json!({ "full_name": "", "email": "bad" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
        assert!(body["details"]["email"].is_array());
        assert!(body["details"]["full_name"].is_array());

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/admin/therapists",
            Some(ADMIN_TOKEN),
            Some(json!({
                "full_name": "Nora New",
                "email": "nora@example.com",
                "specialties": ["Anxiety"],
                "commission_rate_cents": 1500
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["therapist"]["slug"], "nora-new");
        assert_eq!(body["therapist"]["status"], "pending");
        assert_eq!(body["therapist"]["commission_rate_cents"], 1500);

        let logged: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM admin_audit_logs WHERE action = 'therapist.create'",
        )
        .fetch_one(&state.db)
        .await
        .unwrap();
        assert_eq!(logged, 1);
    }

    #[tokio::test]
    async fn test_admin_status_change_and_delete() {
        let state = test_state().await;
        let t = insert_test_therapist(&state.db, "Sue Status", TherapistStatus::Pending).await;

        let (status, _) = send(
            &state,
            Method::POST,
            &format!("/api/admin/therapists/{}/status", t.id),
            Some(ADMIN_TOKEN),
            Some(json!({ "status": "retired" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &state,
            Method::POST,
            &format!("/api/admin/therapists/{}/status", t.id),
            Some(ADMIN_TOKEN),
            Some(json!({ "status": "active" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["therapist"]["status"], "active");

        let (status, _) = send(
            &state,
            Method::DELETE,
            &format!("/api/admin/therapists/{}", t.id),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &state,
            Method::GET,
            &format!("/api/admin/therapists/{}", t.id),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_routes_reject_therapists() {
        let state = test_state().await;
        let (token, _) = therapist_login(&state, "Tom Therapist").await;

        let (status, body) =
            send(&state, Method::GET, "/api/admin/therapists", Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "forbidden");

        let (status, _) = send(&state, Method::GET, "/api/admin/therapists", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_own_profile_update_ignores_commission() {
        let state = test_state().await;
        let (token, therapist) = therapist_login(&state, "Olive Own").await;

        let (status, body) = send(
            &state,
            Method::PUT,
            "/api/me/profile",
            Some(&token),
            Some(json!({ "bio": "Hi there", "commission_rate_cents": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["therapist"]["id"], therapist.id);
        assert_eq!(body["therapist"]["bio"], "Hi there");
        assert!(body["therapist"]["commission_rate_cents"].is_null());
    }
}
