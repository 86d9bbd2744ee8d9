//! Visitor inquiries routed to a therapist.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::now_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactRequestStatus {
    New,
    Contacted,
    Scheduled,
    Closed,
}

impl ContactRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactRequestStatus::New => "new",
            ContactRequestStatus::Contacted => "contacted",
            ContactRequestStatus::Scheduled => "scheduled",
            ContactRequestStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "new" => Some(ContactRequestStatus::New),
            "contacted" => Some(ContactRequestStatus::Contacted),
            "scheduled" => Some(ContactRequestStatus::Scheduled),
            "closed" => Some(ContactRequestStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContactRequest {
    pub id: String,
    pub therapist_id: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    pub preferred_modality: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreateContactRequest {
    pub therapist_id: String,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    pub preferred_modality: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateContactRequestStatus {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ContactRequestQuery {
    pub status: Option<String>,
}

impl ContactRequest {
    pub async fn create(
        db: &SqlitePool,
        req: &CreateContactRequest,
    ) -> Result<ContactRequest, sqlx::Error> {
        let now = now_rfc3339();
        sqlx::query_as(
            r#"
            INSERT INTO contact_requests (
                id, therapist_id, full_name, email, phone, message, preferred_modality,
                status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 'new', ?, ?)
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&req.therapist_id)
        .bind(req.full_name.trim())
        .bind(req.email.trim())
        .bind(&req.phone)
        .bind(req.message.trim())
        .bind(&req.preferred_modality)
        .bind(&now)
        .bind(&now)
        .fetch_one(db)
        .await
    }

    pub async fn list_for_therapist(
        db: &SqlitePool,
        therapist_id: &str,
        status: Option<ContactRequestStatus>,
    ) -> Result<Vec<ContactRequest>, sqlx::Error> {
        let status = status.map(|s| s.as_str());
        sqlx::query_as(
            r#"
            SELECT * FROM contact_requests
            WHERE therapist_id = ? AND (? IS NULL OR status = ?)
            ORDER BY created_at DESC
            "#,
        )
        .bind(therapist_id)
        .bind(status)
        .bind(status)
        .fetch_all(db)
        .await
    }

    pub async fn update_status(
        db: &SqlitePool,
        therapist_id: &str,
        id: &str,
        status: ContactRequestStatus,
    ) -> Result<Option<ContactRequest>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE contact_requests SET status = ?, updated_at = ?
            WHERE id = ? AND therapist_id = ?
            RETURNING *
            "#,
        )
        .bind(status.as_str())
        .bind(now_rfc3339())
        .bind(id)
        .bind(therapist_id)
        .fetch_optional(db)
        .await
    }
}
