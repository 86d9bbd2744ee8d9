use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap},
    Json,
};
use rand::Rng;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::error::ApiError;
use crate::config::Config;
use crate::db::{
    AuthSession, LoginRequest, LoginResponse, Profile, ProfileResponse, Role, Therapist,
};
use crate::AppState;

/// Profile id used for requests authenticated with the config admin token
pub const SYSTEM_ADMIN_ID: &str = "system";

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Random 32-byte token, hex encoded
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create a session for `profile_id` and return the raw token with its expiry
pub async fn issue_session<'e, E>(
    executor: E,
    config: &Config,
    profile_id: &str,
) -> Result<(String, String), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let token = generate_token();
    let expires_at = (chrono::Utc::now() + chrono::Duration::days(config.auth.session_ttl_days))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    AuthSession::create(executor, profile_id, &hash_token(&token), &expires_at).await?;
    Ok((token, expires_at))
}

/// Extract the bearer token from request headers
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get("Authorization")?.to_str().ok()?;
    header
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn is_admin_token(config: &Config, token: &str) -> bool {
    let admin_token = config.auth.admin_token.as_bytes();
    let provided = token.as_bytes();
    !admin_token.is_empty()
        && admin_token.len() == provided.len()
        && bool::from(admin_token.ct_eq(provided))
}

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Resolve a bearer token to a user
pub async fn get_current_user(state: &AppState, token: &str) -> Result<CurrentUser, ApiError> {
    if is_admin_token(&state.config, token) {
        return Ok(CurrentUser {
            id: SYSTEM_ADMIN_ID.to_string(),
            email: state
                .config
                .auth
                .admin_email
                .clone()
                .unwrap_or_else(|| "system@localhost".to_string()),
            full_name: "System Admin".to_string(),
            role: Role::Admin,
        });
    }

    let session = AuthSession::find_active(&state.db, &hash_token(token))
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    let profile = Profile::find_by_id(&state.db, &session.profile_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    let role = profile
        .role_enum()
        .ok_or_else(|| ApiError::forbidden("Unknown role"))?;

    Ok(CurrentUser {
        id: profile.id,
        email: profile.email,
        full_name: profile.full_name,
        role,
    })
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        get_current_user(state, &token).await
    }
}

/// Caller with the admin role
#[derive(Debug, Clone)]
pub struct AdminUser(pub CurrentUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::forbidden("Admin access required"));
        }
        Ok(AdminUser(user))
    }
}

/// Caller with the therapist role, together with their therapist record
#[derive(Debug, Clone)]
pub struct TherapistUser {
    pub user: CurrentUser,
    pub therapist: Therapist,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for TherapistUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != Role::Therapist {
            return Err(ApiError::forbidden("Therapist access required"));
        }
        let therapist = Therapist::find_by_profile(&state.db, &user.id)
            .await?
            .ok_or_else(|| ApiError::forbidden("No therapist profile linked to this account"))?;
        Ok(TherapistUser { user, therapist })
    }
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let profile = Profile::find_by_email(&state.db, request.email.trim())
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    if !verify_password(&request.password, &profile.password_hash) {
        tracing::debug!(email = %profile.email, "Failed login attempt");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let (token, expires_at) = issue_session(&state.db, &state.config, &profile.id).await?;

    tracing::info!(profile_id = %profile.id, "User logged in");

    Ok(Json(LoginResponse {
        ok: true,
        token,
        expires_at,
        profile: ProfileResponse::from(profile),
    }))
}

/// Logout endpoint; revokes the presented session token
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let token =
        extract_token(&headers).ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
    AuthSession::delete_by_token_hash(&state.db, &hash_token(&token)).await?;
    Ok(Json(json!({ "ok": true })))
}

/// Current user endpoint
pub async fn me(State(state): State<Arc<AppState>>, user: CurrentUser) -> Result<Json<Value>, ApiError> {
    let therapist = if user.role == Role::Therapist {
        Therapist::find_by_profile(&state.db, &user.id)
            .await?
            .map(crate::db::TherapistResponse::from)
    } else {
        None
    };

    Ok(Json(json!({
        "ok": true,
        "profile": {
            "id": user.id,
            "email": user.email,
            "full_name": user.full_name,
            "role": user.role,
        },
        "therapist": therapist,
    })))
}

/// Create the configured admin profile on first start
pub async fn ensure_admin_user(db: &crate::DbPool, config: &Config) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&config.auth.admin_email, &config.auth.admin_password)
    else {
        tracing::debug!("No admin credentials configured, skipping admin bootstrap");
        return Ok(());
    };

    if Profile::find_by_email(db, email).await?.is_some() {
        return Ok(());
    }

    let password_hash =
        hash_password(password).map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Profile::create(db, email, &password_hash, "Administrator", Role::Admin).await?;
    tracing::info!(email = %email, "Created admin profile");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_hash_round() {
        let hash = hash_password("correct horse 1").unwrap();
        assert!(verify_password("correct horse 1", &hash));
        assert!(!verify_password("wrong horse 1", &hash));
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn test_token_hashing() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert_ne!(token, generate_token());
        assert_eq!(hash_token(&token), hash_token(&token));
        assert_ne!(hash_token(&token), token);
    }

    #[test]
    fn test_extract_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);
        headers.insert("Authorization", "Basic abc".parse().unwrap());
        assert_eq!(extract_token(&headers), None);
        headers.insert("Authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(extract_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_admin_token_compare() {
        let mut config = Config::default();
        config.auth.admin_token = "secret-token".into();
        assert!(is_admin_token(&config, "secret-token"));
        assert!(!is_admin_token(&config, "secret-tokeN"));
        assert!(!is_admin_token(&config, "secret"));
    }

    #[tokio::test]
    async fn test_ensure_admin_user_is_idempotent() {
        let db = crate::db::test_pool().await;
        let mut config = Config::default();
        config.auth.admin_email = Some("admin@example.com".into());
        config.auth.admin_password = Some("adminpass1".into());

        ensure_admin_user(&db, &config).await.unwrap();
        ensure_admin_user(&db, &config).await.unwrap();

        let profile = Profile::find_by_email(&db, "admin@example.com").await.unwrap().unwrap();
        assert!(profile.is_admin());
        assert!(verify_password("adminpass1", &profile.password_hash));
    }
}
