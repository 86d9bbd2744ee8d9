use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{CreatePatientRequest, Patient, UpdatePatientRequest};
use crate::AppState;

use super::auth::TherapistUser;
use super::error::ApiError;
use super::validation::{validate_create_patient, validate_update_patient};

/// GET /api/me/patients
pub async fn list_patients(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
) -> Result<Json<Value>, ApiError> {
    let items = Patient::list_for_therapist(&state.db, &caller.therapist.id).await?;
    Ok(Json(json!({ "ok": true, "items": items })))
}

/// POST /api/me/patients
pub async fn create_patient(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Json(req): Json<CreatePatientRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    validate_create_patient(&req)?;
    let patient = Patient::create(&state.db, &caller.therapist.id, &req).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "ok": true, "patient": patient })),
    ))
}

/// GET /api/me/patients/:id
pub async fn get_patient(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let patient = Patient::find_for_therapist(&state.db, &caller.therapist.id, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient not found"))?;
    Ok(Json(json!({ "ok": true, "patient": patient })))
}

/// PUT /api/me/patients/:id
pub async fn update_patient(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Path(id): Path<String>,
    Json(req): Json<UpdatePatientRequest>,
) -> Result<Json<Value>, ApiError> {
    validate_update_patient(&req)?;
    let patient = Patient::update(&state.db, &caller.therapist.id, &id, &req)
        .await?
        .ok_or_else(|| ApiError::not_found("Patient not found"))?;
    Ok(Json(json!({ "ok": true, "patient": patient })))
}

/// DELETE /api/me/patients/:id
pub async fn delete_patient(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if !Patient::delete(&state.db, &caller.therapist.id, &id).await? {
        return Err(ApiError::not_found("Patient not found"));
    }
    Ok(Json(json!({ "ok": true })))
}
