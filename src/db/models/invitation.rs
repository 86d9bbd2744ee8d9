//! Single-use therapist onboarding invitations.
//!
//! Only the SHA-256 of the token is stored; the raw token exists in the
//! invitation email and nowhere else.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqlitePool};

use super::common::now_rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TherapistInvitation {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub invited_by: Option<String>,
    pub expires_at: String,
    pub accepted_at: Option<String>,
    pub revoked_at: Option<String>,
    pub created_at: String,
}

/// Why an invitation can no longer be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvitationState {
    Usable,
    Expired,
    Revoked,
    Accepted,
}

impl TherapistInvitation {
    /// Check if the invitation has expired
    pub fn is_expired(&self) -> bool {
        if let Ok(expires) = chrono::DateTime::parse_from_rfc3339(&self.expires_at) {
            expires < chrono::Utc::now()
        } else {
            true // Treat parse errors as expired
        }
    }

    pub fn state(&self) -> InvitationState {
        if self.accepted_at.is_some() {
            InvitationState::Accepted
        } else if self.revoked_at.is_some() {
            InvitationState::Revoked
        } else if self.is_expired() {
            InvitationState::Expired
        } else {
            InvitationState::Usable
        }
    }

    pub async fn create(
        db: &SqlitePool,
        email: &str,
        full_name: Option<&str>,
        token_hash: &str,
        invited_by: Option<&str>,
        expires_at: &str,
    ) -> Result<TherapistInvitation, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO therapist_invitations (id, email, full_name, token_hash, invited_by, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(email.trim().to_lowercase())
        .bind(full_name)
        .bind(token_hash)
        .bind(invited_by)
        .bind(expires_at)
        .bind(now_rfc3339())
        .fetch_one(db)
        .await
    }

    pub async fn find_by_id(
        db: &SqlitePool,
        id: &str,
    ) -> Result<Option<TherapistInvitation>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM therapist_invitations WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_by_token_hash(
        db: &SqlitePool,
        token_hash: &str,
    ) -> Result<Option<TherapistInvitation>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM therapist_invitations WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(db)
            .await
    }

    /// An open (unaccepted, unrevoked, unexpired) invitation for this email
    pub async fn find_open_for_email(
        db: &SqlitePool,
        email: &str,
    ) -> Result<Option<TherapistInvitation>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM therapist_invitations
            WHERE email = ? AND accepted_at IS NULL AND revoked_at IS NULL AND expires_at > ?
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(email.trim().to_lowercase())
        .bind(now_rfc3339())
        .fetch_optional(db)
        .await
    }

    pub async fn list(db: &SqlitePool) -> Result<Vec<TherapistInvitation>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM therapist_invitations ORDER BY created_at DESC")
            .fetch_all(db)
            .await
    }

    /// Atomically claim the invitation. Returns false if someone else got there first.
    pub async fn mark_accepted<'e, E>(executor: E, id: &str) -> Result<bool, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE therapist_invitations SET accepted_at = ? WHERE id = ? AND accepted_at IS NULL AND revoked_at IS NULL",
        )
        .bind(now_rfc3339())
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn revoke(db: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE therapist_invitations SET revoked_at = ? WHERE id = ? AND accepted_at IS NULL AND revoked_at IS NULL",
        )
        .bind(now_rfc3339())
        .bind(id)
        .execute(db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the token and push out the expiry (used by resend)
    pub async fn rotate_token(
        db: &SqlitePool,
        id: &str,
        token_hash: &str,
        expires_at: &str,
    ) -> Result<Option<TherapistInvitation>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE therapist_invitations SET token_hash = ?, expires_at = ?
            WHERE id = ? AND accepted_at IS NULL AND revoked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(token_hash)
        .bind(expires_at)
        .bind(id)
        .fetch_optional(db)
        .await
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateInvitationRequest {
    pub email: String,
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BulkInvitationRequest {
    pub invitations: Vec<CreateInvitationRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkInvitationResult {
    pub email: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcceptInvitationRequest {
    pub token: String,
    pub password: String,
    pub full_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invitation(expires_at: &str) -> TherapistInvitation {
        TherapistInvitation {
            id: "i1".into(),
            email: "a@example.com".into(),
            full_name: None,
            token_hash: "h".into(),
            invited_by: None,
            expires_at: expires_at.into(),
            accepted_at: None,
            revoked_at: None,
            created_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_invitation_state() {
        let future = (chrono::Utc::now() + chrono::Duration::days(1)).to_rfc3339();
        assert_eq!(invitation(&future).state(), InvitationState::Usable);
        assert_eq!(invitation("2020-01-01T00:00:00Z").state(), InvitationState::Expired);
        assert_eq!(invitation("garbage").state(), InvitationState::Expired);

        let mut accepted = invitation(&future);
        accepted.accepted_at = Some("2026-01-02T00:00:00Z".into());
        assert_eq!(accepted.state(), InvitationState::Accepted);

        let mut revoked = invitation(&future);
        revoked.revoked_at = Some("2026-01-02T00:00:00Z".into());
        assert_eq!(revoked.state(), InvitationState::Revoked);
    }
}
