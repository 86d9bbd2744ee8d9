//! Contact requests: the public inquiry form and the therapist's inbox.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    ContactRequest, ContactRequestQuery, ContactRequestStatus, CreateContactRequest, MatchEvent,
    MatchEventType, Therapist, UpdateContactRequestStatus,
};
use crate::AppState;

use super::auth::TherapistUser;
use super::error::ApiError;
use super::metrics::record_contact_request;
use super::validation::validate_contact_request;

fn parse_status(status: &str) -> Result<ContactRequestStatus, ApiError> {
    ContactRequestStatus::from_str(status).ok_or_else(|| {
        ApiError::validation_field(
            "status",
            "Status must be one of: new, contacted, scheduled, closed",
        )
    })
}

/// POST /api/contact
pub async fn create_contact_request(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateContactRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_contact_request(&req)?;

    let therapist = Therapist::find_by_id(&state.db, &req.therapist_id)
        .await?
        .filter(|t| t.is_active())
        .ok_or_else(|| ApiError::not_found("Therapist not found"))?;

    let request = ContactRequest::create(&state.db, &req).await?;
    record_contact_request();

    if let Err(e) =
        MatchEvent::record(&state.db, &therapist.id, MatchEventType::ContactClick, None).await
    {
        tracing::warn!(therapist_id = %therapist.id, error = %e, "Failed to record contact click");
    }

    tracing::info!(
        therapist_id = %therapist.id,
        contact_request_id = %request.id,
        "Contact request received"
    );

    if let Err(e) = state.email.send_contact_request(&therapist, &request).await {
        tracing::warn!(contact_request_id = %request.id, error = %e, "Failed to notify therapist");
    }
    if let Err(e) = state
        .email
        .send_contact_acknowledgement(&therapist, &request)
        .await
    {
        tracing::warn!(contact_request_id = %request.id, error = %e, "Failed to acknowledge contact request");
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "id": request.id })),
    ))
}

/// GET /api/me/contact-requests
pub async fn list_contact_requests(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Query(query): Query<ContactRequestQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let items = ContactRequest::list_for_therapist(&state.db, &caller.therapist.id, status).await?;
    Ok(Json(json!({ "ok": true, "items": items })))
}

/// PATCH /api/me/contact-requests/:id
pub async fn update_contact_request_status(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateContactRequestStatus>,
) -> Result<Json<Value>, ApiError> {
    let status = parse_status(&req.status)?;

    let request = ContactRequest::update_status(&state.db, &caller.therapist.id, &id, status)
        .await?
        .ok_or_else(|| ApiError::not_found("Contact request not found"))?;

    Ok(Json(json!({ "ok": true, "contact_request": request })))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::api::test_support::{send, test_state, therapist_login};
    use crate::db::{
        insert_test_therapist, MetricsRangeQuery, TherapistMetrics, TherapistStatus,
    };

    #[tokio::test]
    async fn test_contact_request_succeeds_without_email() {
        let state = test_state().await;
        let t = insert_test_therapist(&state.db, "Cora Contact", TherapistStatus::Active).await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/contact",
            None,
            Some(json!({
                "therapist_id": t.id,
                "full_name": "Visitor",
                "email": "visitor@example.com",
                "message": "I would like an appointment"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["ok"], true);
        assert!(body["id"].is_string());

        let metrics = TherapistMetrics::list_for_therapist(&state.db, &t.id, &MetricsRangeQuery::default())
            .await
            .unwrap();
        assert_eq!(metrics.contact_requests, 1);
    }

    #[tokio::test]
    async fn test_contact_request_rejects_bad_input_and_inactive() {
        let state = test_state().await;
        let pending = insert_test_therapist(&state.db, "Pete Pending", TherapistStatus::Pending).await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/contact",
            None,
            Some(json!({
                "therapist_id": pending.id,
                "full_name": "Visitor",
                "email": "not-an-email",
                "message": "Hello"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["details"]["email"].is_array());

        let (status, _) = send(
            &state,
            Method::POST,
            "/api/contact",
            None,
            Some(json!({
                "therapist_id": pending.id,
                "full_name": "Visitor",
                "email": "visitor@example.com",
                "message": "Hello"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_therapist_inbox_is_scoped() {
        let state = test_state().await;
        let (token, therapist) = therapist_login(&state, "Ines Inbox").await;
        let other = insert_test_therapist(&state.db, "Otto Other", TherapistStatus::Active).await;

        for target in [&therapist.id, &other.id] {
            let (status, _) = send(
                &state,
                Method::POST,
                "/api/contact",
                None,
                Some(json!({
                    "therapist_id": target,
                    "full_name": "Visitor",
                    "email": "visitor@example.com",
                    "message": "Hello"
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) =
            send(&state, Method::GET, "/api/me/contact-requests", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        let id = items[0]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &state,
            Method::PATCH,
            &format!("/api/me/contact-requests/{}", id),
            Some(&token),
            Some(json!({ "status": "contacted" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contact_request"]["status"], "contacted");

        let (status, body) = send(
            &state,
            Method::GET,
            "/api/me/contact-requests?status=new",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"].as_array().unwrap().len(), 0);
    }
}
