//! Therapy sessions on a therapist's calendar.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::now_rfc3339;

pub const DEFAULT_SESSION_MINUTES: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::NoShow => "no_show",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(SessionStatus::Scheduled),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            "no_show" => Some(SessionStatus::NoShow),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TherapySession {
    pub id: String,
    pub therapist_id: String,
    pub patient_id: Option<String>,
    pub contact_request_id: Option<String>,
    pub scheduled_at: String,
    pub duration_minutes: i64,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CreateSessionRequest {
    pub patient_id: Option<String>,
    pub contact_request_id: Option<String>,
    pub scheduled_at: String,
    pub duration_minutes: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateSessionRequest {
    pub patient_id: Option<String>,
    pub scheduled_at: Option<String>,
    pub duration_minutes: Option<i64>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SessionRangeQuery {
    /// Inclusive lower bound (RFC 3339)
    pub from: Option<String>,
    /// Exclusive upper bound (RFC 3339)
    pub to: Option<String>,
}

/// Normalize any RFC 3339 timestamp to the UTC form stored in the database
pub fn normalize_timestamp(value: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| {
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        })
}

impl TherapySession {
    pub fn status_enum(&self) -> Option<SessionStatus> {
        SessionStatus::from_str(&self.status)
    }

    pub async fn list_for_therapist(
        db: &SqlitePool,
        therapist_id: &str,
        range: &SessionRangeQuery,
    ) -> Result<Vec<TherapySession>, sqlx::Error> {
        let from = range.from.as_deref().and_then(normalize_timestamp);
        let to = range.to.as_deref().and_then(normalize_timestamp);
        sqlx::query_as(
            r#"
            SELECT * FROM sessions
            WHERE therapist_id = ?
              AND (? IS NULL OR scheduled_at >= ?)
              AND (? IS NULL OR scheduled_at < ?)
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(therapist_id)
        .bind(&from)
        .bind(&from)
        .bind(&to)
        .bind(&to)
        .fetch_all(db)
        .await
    }

    pub async fn find_for_therapist(
        db: &SqlitePool,
        therapist_id: &str,
        id: &str,
    ) -> Result<Option<TherapySession>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM sessions WHERE id = ? AND therapist_id = ?")
            .bind(id)
            .bind(therapist_id)
            .fetch_optional(db)
            .await
    }

    /// Whether `[start, start + minutes)` collides with a live session,
    /// ignoring `exclude_id` (the session being edited)
    pub async fn has_overlap(
        db: &SqlitePool,
        therapist_id: &str,
        start: &str,
        minutes: i64,
        exclude_id: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sessions
            WHERE therapist_id = ?
              AND status != 'cancelled'
              AND (? IS NULL OR id != ?)
              AND CAST(strftime('%s', scheduled_at) AS INTEGER)
                  < CAST(strftime('%s', ?) AS INTEGER) + ? * 60
              AND CAST(strftime('%s', scheduled_at) AS INTEGER) + duration_minutes * 60
                  > CAST(strftime('%s', ?) AS INTEGER)
            "#,
        )
        .bind(therapist_id)
        .bind(exclude_id)
        .bind(exclude_id)
        .bind(start)
        .bind(minutes)
        .bind(start)
        .fetch_one(db)
        .await?;
        Ok(count > 0)
    }

    /// `scheduled_at` must already be normalized
    pub async fn create(
        db: &SqlitePool,
        therapist_id: &str,
        req: &CreateSessionRequest,
        scheduled_at: &str,
    ) -> Result<TherapySession, sqlx::Error> {
        let now = now_rfc3339();
        sqlx::query_as(
            r#"
            INSERT INTO sessions (
                id, therapist_id, patient_id, contact_request_id, scheduled_at,
                duration_minutes, status, notes, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, 'scheduled', ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(therapist_id)
        .bind(&req.patient_id)
        .bind(&req.contact_request_id)
        .bind(scheduled_at)
        .bind(req.duration_minutes.unwrap_or(DEFAULT_SESSION_MINUTES))
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
        req: &UpdateSessionRequest,
        scheduled_at: Option<&str>,
    ) -> Result<Option<TherapySession>, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE sessions SET
                patient_id = COALESCE(?, patient_id),
                scheduled_at = COALESCE(?, scheduled_at),
                duration_minutes = COALESCE(?, duration_minutes),
                status = COALESCE(?, status),
                notes = COALESCE(?, notes),
                updated_at = ?
            WHERE id = ? AND therapist_id = ?
            RETURNING *
            "#,
        )
        .bind(&req.patient_id)
        .bind(scheduled_at)
        .bind(req.duration_minutes)
        .bind(&req.status)
        .bind(&req.notes)
        .bind(now_rfc3339())
        .bind(id)
        .bind(therapist_id)
        .fetch_optional(db)
        .await
    }

    /// Completed sessions whose start date falls inside `[start, end]`
    pub async fn count_completed_between(
        db: &SqlitePool,
        therapist_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sessions
            WHERE therapist_id = ?
              AND status = 'completed'
              AND date(scheduled_at) BETWEEN ? AND ?
            "#,
        )
        .bind(therapist_id)
        .bind(start.format("%Y-%m-%d").to_string())
        .bind(end.format("%Y-%m-%d").to_string())
        .fetch_one(db)
        .await
    }
}
