//! Therapist onboarding invitations.
//!
//! Admins invite by email; the raw token only travels in the email link.
//! Accepting creates the therapist login and a `pending` directory entry in
//! one transaction and claims the invitation atomically, so a token can be
//! used once.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    actions, resource_types, AcceptInvitationRequest, BulkInvitationRequest,
    BulkInvitationResult, CreateInvitationRequest, CreateTherapistRequest, InvitationState,
    Profile, ProfileResponse, Role, Therapist, TherapistInvitation, TherapistResponse,
    TherapistStatus,
};
use crate::AppState;

use super::audit::audit_log;
use super::auth::{generate_token, hash_password, hash_token, issue_session, AdminUser};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_name, validate_password};

const MAX_BULK_INVITATIONS: usize = 200;

fn expiry(state: &AppState) -> String {
    (chrono::Utc::now() + chrono::Duration::days(state.config.auth.invitation_ttl_days))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn accept_url(state: &AppState, token: &str) -> String {
    state
        .config
        .site
        .url(&format!("/invitations/accept?token={}", token))
}

fn state_error(state: InvitationState) -> ApiError {
    match state {
        InvitationState::Accepted => ApiError::gone("Invitation has already been used"),
        InvitationState::Revoked => ApiError::gone("Invitation has been revoked"),
        InvitationState::Expired => ApiError::gone("Invitation has expired"),
        InvitationState::Usable => ApiError::internal("Invitation is usable"),
    }
}

fn invitation_body(invitation: &TherapistInvitation) -> Value {
    json!({
        "id": invitation.id,
        "email": invitation.email,
        "full_name": invitation.full_name,
        "invited_by": invitation.invited_by,
        "expires_at": invitation.expires_at,
        "accepted_at": invitation.accepted_at,
        "revoked_at": invitation.revoked_at,
        "created_at": invitation.created_at,
    })
}

async fn send_invitation_email(
    state: &AppState,
    invitation: &TherapistInvitation,
    token: &str,
) -> bool {
    match state
        .email
        .send_invitation(
            &invitation.email,
            invitation.full_name.as_deref(),
            &accept_url(state, token),
            state.config.auth.invitation_ttl_days,
        )
        .await
    {
        Ok(sent) => sent,
        Err(e) => {
            tracing::warn!(invitation_id = %invitation.id, error = %e, "Failed to send invitation email");
            false
        }
    }
}

/// Validate, create and email one invitation
async fn issue_invitation(
    state: &AppState,
    invited_by: &str,
    req: &CreateInvitationRequest,
) -> Result<(TherapistInvitation, bool), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("email", validate_email(&req.email));
    if let Some(name) = &req.full_name {
        errors.check("full_name", validate_name(name));
    }
    errors.finish()?;

    let email = req.email.trim().to_lowercase();
    if Profile::find_by_email(&state.db, &email).await?.is_some() {
        return Err(ApiError::conflict("An account with this email already exists"));
    }
    if TherapistInvitation::find_open_for_email(&state.db, &email)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict("An open invitation for this email already exists"));
    }

    let token = generate_token();
    let invitation = TherapistInvitation::create(
        &state.db,
        &email,
        req.full_name.as_deref().map(str::trim),
        &hash_token(&token),
        Some(invited_by),
        &expiry(state),
    )
    .await?;

    tracing::info!(invitation_id = %invitation.id, email = %invitation.email, "Invitation created");

    let email_sent = send_invitation_email(state, &invitation, &token).await;
    Ok((invitation, email_sent))
}

/// GET /api/admin/invitations
pub async fn list_invitations(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<Json<Value>, ApiError> {
    let items: Vec<Value> = TherapistInvitation::list(&state.db)
        .await?
        .iter()
        .map(invitation_body)
        .collect();
    Ok(Json(json!({ "ok": true, "items": items })))
}

/// POST /api/admin/invitations
pub async fn create_invitation(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    headers: HeaderMap,
    Json(req): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (invitation, email_sent) = issue_invitation(&state, &admin.0.id, &req).await?;

    audit_log(
        &state,
        &admin,
        &headers,
        actions::INVITATION_CREATE,
        resource_types::INVITATION,
        Some(&invitation.id),
        Some(json!({ "email": invitation.email })),
    )
    .await;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "invitation": invitation_body(&invitation),
            "email_sent": email_sent,
        })),
    ))
}

/// POST /api/admin/invitations/bulk
///
/// Each row is handled on its own; a failing row is reported and the rest
/// still go out.
pub async fn bulk_create_invitations(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    headers: HeaderMap,
    Json(req): Json<BulkInvitationRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.invitations.is_empty() {
        return Err(ApiError::validation_field("invitations", "At least one invitation is required"));
    }
    if req.invitations.len() > MAX_BULK_INVITATIONS {
        return Err(ApiError::validation_field(
            "invitations",
            format!("Too many invitations (max {})", MAX_BULK_INVITATIONS),
        ));
    }

    let mut results = Vec::with_capacity(req.invitations.len());
    for row in &req.invitations {
        match issue_invitation(&state, &admin.0.id, row).await {
            Ok((invitation, _)) => results.push(BulkInvitationResult {
                email: invitation.email,
                ok: true,
                id: Some(invitation.id),
                error: None,
            }),
            Err(e) => {
                tracing::warn!(email = %row.email, error = %e, "Bulk invitation row failed");
                results.push(BulkInvitationResult {
                    email: row.email.trim().to_lowercase(),
                    ok: false,
                    id: None,
                    error: Some(e.message().to_string()),
                });
            }
        }
    }

    let created = results.iter().filter(|r| r.ok).count();
    let failed = results.len() - created;

    audit_log(
        &state,
        &admin,
        &headers,
        actions::INVITATION_BULK,
        resource_types::INVITATION,
        None,
        Some(json!({ "created": created, "failed": failed })),
    )
    .await;

    Ok(Json(json!({
        "ok": true,
        "created": created,
        "failed": failed,
        "results": results,
    })))
}

/// POST /api/admin/invitations/:id/resend
pub async fn resend_invitation(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let existing = TherapistInvitation::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Invitation not found"))?;

    match existing.state() {
        InvitationState::Usable | InvitationState::Expired => {}
        other => return Err(state_error(other)),
    }

    let token = generate_token();
    let invitation =
        TherapistInvitation::rotate_token(&state.db, &id, &hash_token(&token), &expiry(&state))
            .await?
            .ok_or_else(|| ApiError::gone("Invitation can no longer be resent"))?;

    let email_sent = send_invitation_email(&state, &invitation, &token).await;

    audit_log(
        &state,
        &admin,
        &headers,
        actions::INVITATION_RESEND,
        resource_types::INVITATION,
        Some(&id),
        Some(json!({ "email_sent": email_sent })),
    )
    .await;

    Ok(Json(json!({
        "ok": true,
        "invitation": invitation_body(&invitation),
        "email_sent": email_sent,
    })))
}

/// DELETE /api/admin/invitations/:id
pub async fn revoke_invitation(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let existing = TherapistInvitation::find_by_id(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::not_found("Invitation not found"))?;

    if !TherapistInvitation::revoke(&state.db, &id).await? {
        return Err(ApiError::conflict(format!(
            "Invitation is already {}",
            if existing.accepted_at.is_some() { "accepted" } else { "revoked" }
        )));
    }

    audit_log(
        &state,
        &admin,
        &headers,
        actions::INVITATION_REVOKE,
        resource_types::INVITATION,
        Some(&id),
        Some(json!({ "email": existing.email })),
    )
    .await;

    Ok(Json(json!({ "ok": true })))
}

async fn find_usable(state: &AppState, token: &str) -> Result<TherapistInvitation, ApiError> {
    let invitation = TherapistInvitation::find_by_token_hash(&state.db, &hash_token(token.trim()))
        .await?
        .ok_or_else(|| ApiError::not_found("Invitation not found"))?;

    match invitation.state() {
        InvitationState::Usable => Ok(invitation),
        other => Err(state_error(other)),
    }
}

/// GET /api/invitations/:token
pub async fn get_invitation(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let invitation = find_usable(&state, &token).await?;
    Ok(Json(json!({
        "ok": true,
        "email": invitation.email,
        "full_name": invitation.full_name,
        "expires_at": invitation.expires_at,
    })))
}

/// POST /api/invitations/accept
pub async fn accept_invitation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AcceptInvitationRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let invitation = find_usable(&state, &req.token).await?;

    let full_name = req
        .full_name
        .as_deref()
        .or(invitation.full_name.as_deref())
        .unwrap_or("")
        .trim()
        .to_string();

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("password", validate_password(&req.password))
        .check("full_name", validate_name(&full_name));
    errors.finish()?;

    if Profile::find_by_email(&state.db, &invitation.email)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict("An account with this email already exists"));
    }

    let password_hash = hash_password(&req.password)
        .map_err(|e| ApiError::internal(format!("Failed to hash password: {}", e)))?;

    let mut tx = state.db.begin().await?;

    if !TherapistInvitation::mark_accepted(&mut *tx, &invitation.id).await? {
        return Err(ApiError::gone("Invitation has already been used"));
    }

    let profile =
        Profile::create(&mut *tx, &invitation.email, &password_hash, &full_name, Role::Therapist)
            .await?;

    let therapist = Therapist::insert(
        &mut tx,
        &CreateTherapistRequest {
            full_name: full_name.clone(),
            email: invitation.email.clone(),
            status: Some(TherapistStatus::Pending.as_str().to_string()),
            ..Default::default()
        },
        Some(&profile.id),
    )
    .await?;

    let (token, expires_at) = issue_session(&mut *tx, &state.config, &profile.id).await?;

    tx.commit().await?;

    tracing::info!(
        invitation_id = %invitation.id,
        profile_id = %profile.id,
        therapist_id = %therapist.id,
        "Invitation accepted"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "token": token,
            "expires_at": expires_at,
            "profile": ProfileResponse::from(profile),
            "therapist": TherapistResponse::from(therapist),
        })),
    ))
}
