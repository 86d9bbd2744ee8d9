//! Scheduled payment notification callbacks.
//!
//! The scheduler signs each delivery with a JWT in `Upstash-Signature`
//! (HS256 over a current and a next signing key). The `body` claim carries
//! the base64url SHA-256 of the raw request body.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::engine::{process_stage, StageMessage, WEBHOOK_PATH};
use crate::AppState;

use super::error::ApiError;

pub const SIGNATURE_HEADER: &str = "Upstash-Signature";
pub const SIGNATURE_ISSUER: &str = "Upstash";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureClaims {
    pub iss: String,
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// base64url SHA-256 of the request body
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("no signing keys configured")]
    NoKeys,
    #[error("invalid token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("body hash does not match")]
    BodyMismatch,
}

/// base64url (unpadded) SHA-256 of `body`
pub fn body_digest(body: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(body))
}

fn verify_with_key(
    key: &str,
    token: &str,
    destination: Option<&str>,
) -> Result<SignatureClaims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[SIGNATURE_ISSUER]);
    validation.set_required_spec_claims(&["exp", "iss", "sub"]);
    validation.validate_nbf = true;
    validation.leeway = 5;
    validation.sub = destination.map(str::to_string);

    decode::<SignatureClaims>(token, &DecodingKey::from_secret(key.as_bytes()), &validation)
        .map(|data| data.claims)
}

/// Verify `token` against each key in order and check the body claim
pub fn verify_signature(
    keys: &[&str],
    token: &str,
    destination: Option<&str>,
    body: &[u8],
) -> Result<SignatureClaims, SignatureError> {
    let mut last_error = None;
    let mut claims = None;
    for key in keys {
        match verify_with_key(key, token, destination) {
            Ok(c) => {
                claims = Some(c);
                break;
            }
            Err(e) => last_error = Some(e),
        }
    }

    let claims = match (claims, last_error) {
        (Some(c), _) => c,
        (None, Some(e)) => return Err(SignatureError::Token(e)),
        (None, None) => return Err(SignatureError::NoKeys),
    };

    let expected = body_digest(body);
    let provided = claims.body.trim_end_matches('=');
    if !bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(SignatureError::BodyMismatch);
    }

    Ok(claims)
}

/// POST /webhooks/payment-notifications
pub async fn payment_notification_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let keys = state.config.scheduler.signing_keys();
    if keys.is_empty() {
        tracing::warn!("Payment notification received but no signing keys are configured");
        return Err(ApiError::unauthorized("Webhook signing is not configured"));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing signature"))?;

    let destination = state
        .config
        .scheduler
        .verify_destination
        .then(|| state.config.site.url(WEBHOOK_PATH));

    if let Err(e) = verify_signature(&keys, signature, destination.as_deref(), &body) {
        tracing::warn!(error = %e, "Rejected payment notification signature");
        return Err(ApiError::unauthorized("Invalid signature"));
    }

    let message: StageMessage = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid notification body: {}", e)))?;

    let outcome = process_stage(&state.db, &state.email, &message.payment_id, message.stage).await?;

    let mut response = json!({ "ok": true, "stage": message.stage });
    if let Some(reason) = outcome.skipped_reason() {
        response["skipped"] = json!(reason);
    }
    Ok(Json(response))
}
