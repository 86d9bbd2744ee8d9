//! A therapist's private patient list.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::now_rfc3339;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Patient {
    pub id: String,
    pub therapist_id: String,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreatePatientRequest {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdatePatientRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

impl Patient {
    pub async fn list_for_therapist(
        db: &SqlitePool,
        therapist_id: &str,
    ) -> Result<Vec<Patient>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM patients WHERE therapist_id = ? ORDER BY full_name ASC")
            .bind(therapist_id)
            .fetch_all(db)
            .await
    }

    /// Scoped lookup so a therapist can never read another therapist's patient
    pub async fn find_for_therapist(
        db: &SqlitePool,
        therapist_id: &str,
        id: &str,
    ) -> Result<Option<Patient>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM patients WHERE id = ? AND therapist_id = ?")
            .bind(id)
            .bind(therapist_id)
            .fetch_optional(db)
            .await
    }

    pub async fn create(
        db: &SqlitePool,
        therapist_id: &str,
        req: &CreatePatientRequest,
    ) -> Result<Patient, sqlx::Error> {
        let now = now_rfc3339();
        sqlx::query_as(
            r#"
            INSERT INTO patients (id, therapist_id, full_name, email, phone, notes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(therapist_id)
        .bind(req.full_name.trim())
        .bind(&req.email)
        .bind(&req.phone)
        .bind(&req.notes)
        .bind(&now)
        .bind(&now)
        .fetch_one(db)
        .await
    }

    pub async fn update(
        db: &SqlitePool,
        therapist_id: &str,
        id: &str,
        req: &UpdatePatientRequest,
    ) -> Result<Option<Patient>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE patients SET
                full_name = COALESCE(?, full_name),
                email = COALESCE(?, email),
                phone = COALESCE(?, phone),
                notes = COALESCE(?, notes),
                updated_at = ?
            WHERE id = ? AND therapist_id = ?
            RETURNING *
            "#,
        )
        .bind(req.full_name.as_deref().map(str::trim))
        .bind(&req.email)
        .bind(&req.phone)
        .bind(&req.notes)
        .bind(now_rfc3339())
        .bind(id)
        .bind(therapist_id)
        .fetch_optional(db)
        .await
    }

    pub async fn delete(db: &SqlitePool, therapist_id: &str, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM patients WHERE id = ? AND therapist_id = ?")
            .bind(id)
            .bind(therapist_id)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
