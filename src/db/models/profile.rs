//! Profile (login identity) and session models.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::now_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Therapist,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Therapist => "therapist",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "therapist" => Some(Role::Therapist),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Profile {
    pub fn role_enum(&self) -> Option<Role> {
        Role::from_str(&self.role)
    }

    pub fn is_admin(&self) -> bool {
        self.role_enum() == Some(Role::Admin)
    }

    pub async fn find_by_id(db: &SqlitePool, id: &str) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_email(
        db: &SqlitePool,
        email: &str,
    ) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM profiles WHERE email = ? COLLATE NOCASE")
            .bind(email)
            .fetch_optional(db)
            .await
    }

    pub async fn create<'e, E>(
        executor: E,
        email: &str,
        password_hash: &str,
        full_name: &str,
        role: Role,
    ) -> Result<Profile, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let now = now_rfc3339();
        sqlx::query_as(
            r#"
            INSERT INTO profiles (id, email, password_hash, full_name, role, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(email.to_lowercase())
        .bind(password_hash)
        .bind(full_name)
        .bind(role.as_str())
        .bind(&now)
        .bind(&now)
        .fetch_one(executor)
        .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: String,
}

impl From<Profile> for ProfileResponse {
    fn from(profile: Profile) -> Self {
        Self {
            id: profile.id,
            email: profile.email,
            full_name: profile.full_name,
            role: profile.role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthSession {
    pub id: String,
    pub profile_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

impl AuthSession {
    pub async fn create<'e, E>(
        executor: E,
        profile_id: &str,
        token_hash: &str,
        expires_at: &str,
    ) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(
            "INSERT INTO auth_sessions (id, profile_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(profile_id)
        .bind(token_hash)
        .bind(expires_at)
        .bind(now_rfc3339())
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Find an unexpired session by token hash
    pub async fn find_active(
        db: &SqlitePool,
        token_hash: &str,
    ) -> Result<Option<AuthSession>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM auth_sessions WHERE token_hash = ? AND expires_at > ?")
            .bind(token_hash)
            .bind(now_rfc3339())
            .fetch_optional(db)
            .await
    }

    pub async fn delete_by_token_hash(db: &SqlitePool, token_hash: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE token_hash = ?")
            .bind(token_hash)
            .execute(db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub token: String,
    pub expires_at: String,
    pub profile: ProfileResponse,
}
