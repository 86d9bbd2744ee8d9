//! The therapist's session calendar.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    normalize_timestamp, CreateSessionRequest, Patient, SessionRangeQuery, SessionStatus,
    TherapySession, UpdateSessionRequest, DEFAULT_SESSION_MINUTES,
};
use crate::AppState;

use super::auth::TherapistUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_create_session, validate_timestamp, validate_update_session};

async fn ensure_own_patient(
    state: &AppState,
    therapist_id: &str,
    patient_id: Option<&str>,
) -> Result<(), ApiError> {
    if let Some(patient_id) = patient_id {
        if Patient::find_for_therapist(&state.db, therapist_id, patient_id)
            .await?
            .is_none()
        {
            return Err(ApiError::validation_field("patient_id", "Unknown patient"));
        }
    }
    Ok(())
}

fn overlap_error() -> ApiError {
    ApiError::conflict("Session overlaps another scheduled session")
}

/// GET /api/me/sessions
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Query(range): Query<SessionRangeQuery>,
) -> Result<Json<Value>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(from) = &range.from {
        errors.check("from", validate_timestamp(from));
    }
    if let Some(to) = &range.to {
        errors.check("to", validate_timestamp(to));
    }
    errors.finish()?;

    let items = TherapySession::list_for_therapist(&state.db, &caller.therapist.id, &range).await?;
    Ok(Json(json!({ "ok": true, "items": items })))
}

/// POST /api/me/sessions
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_create_session(&req)?;
    let therapist_id = &caller.therapist.id;

    let scheduled_at = normalize_timestamp(&req.scheduled_at)
        .ok_or_else(|| ApiError::validation_field("scheduled_at", "Must be an RFC 3339 timestamp"))?;
    let minutes = req.duration_minutes.unwrap_or(DEFAULT_SESSION_MINUTES);

    ensure_own_patient(&state, therapist_id, req.patient_id.as_deref()).await?;

    if TherapySession::has_overlap(&state.db, therapist_id, &scheduled_at, minutes, None).await? {
        return Err(overlap_error());
    }

    let session = TherapySession::create(&state.db, therapist_id, &req, &scheduled_at).await?;
    tracing::debug!(therapist_id = %therapist_id, session_id = %session.id, "Session scheduled");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "session": session })),
    ))
}

/// PUT /api/me/sessions/:id
pub async fn update_session(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateSessionRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_update_session(&req)?;
    let therapist_id = &caller.therapist.id;

    let existing = TherapySession::find_for_therapist(&state.db, therapist_id, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found"))?;

    ensure_own_patient(&state, therapist_id, req.patient_id.as_deref()).await?;

    let scheduled_at = req.scheduled_at.as_deref().and_then(normalize_timestamp);
    let start = scheduled_at.as_deref().unwrap_or(&existing.scheduled_at);
    let minutes = req.duration_minutes.unwrap_or(existing.duration_minutes);
    let status = req
        .status
        .as_deref()
        .and_then(SessionStatus::from_str)
        .or_else(|| existing.status_enum());

    if status != Some(SessionStatus::Cancelled)
        && TherapySession::has_overlap(&state.db, therapist_id, start, minutes, Some(&id)).await?
    {
        return Err(overlap_error());
    }

    let session = TherapySession::update(&state.db, therapist_id, &id, &req, scheduled_at.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found"))?;

    Ok(Json(json!({ "ok": true, "session": session })))
}

/// POST /api/me/sessions/:id/cancel
pub async fn cancel_session(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let req = UpdateSessionRequest {
        status: Some(SessionStatus::Cancelled.as_str().to_string()),
        ..Default::default()
    };
    let session = TherapySession::update(&state.db, &caller.therapist.id, &id, &req, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found"))?;

    tracing::debug!(session_id = %session.id, "Session cancelled");
    Ok(Json(json!({ "ok": true, "session": session })))
}
