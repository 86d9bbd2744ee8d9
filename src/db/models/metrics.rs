//! Per-therapist daily counters and raw match events.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::now_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchEventType {
    SearchImpression,
    ProfileView,
    ContactClick,
}

impl MatchEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchEventType::SearchImpression => "search_impression",
            MatchEventType::ProfileView => "profile_view",
            MatchEventType::ContactClick => "contact_click",
        }
    }

    /// Counter column bumped alongside the event
    fn counter_column(&self) -> &'static str {
        match self {
            MatchEventType::SearchImpression => "search_impressions",
            MatchEventType::ProfileView => "profile_views",
            MatchEventType::ContactClick => "contact_requests",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TherapistMetrics {
    pub therapist_id: String,
    pub date: String,
    pub profile_views: i64,
    pub contact_requests: i64,
    pub search_impressions: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MatchEvent {
    pub id: String,
    pub therapist_id: String,
    pub event_type: String,
    pub search_query: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsRangeQuery {
    /// Inclusive `YYYY-MM-DD`
    pub from: Option<String>,
    /// Inclusive `YYYY-MM-DD`
    pub to: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub days: Vec<TherapistMetrics>,
    pub profile_views: i64,
    pub contact_requests: i64,
    pub search_impressions: i64,
}

impl TherapistMetrics {
    pub async fn list_for_therapist(
        db: &SqlitePool,
        therapist_id: &str,
        range: &MetricsRangeQuery,
    ) -> Result<MetricsSummary, sqlx::Error> {
        let days: Vec<TherapistMetrics> = sqlx::query_as(
            r#"
            SELECT * FROM therapist_metrics
            WHERE therapist_id = ?
              AND (? IS NULL OR date >= ?)
              AND (? IS NULL OR date <= ?)
            ORDER BY date ASC
            "#,
        )
        .bind(therapist_id)
        .bind(&range.from)
        .bind(&range.from)
        .bind(&range.to)
        .bind(&range.to)
        .fetch_all(db)
        .await?;

        Ok(MetricsSummary {
            profile_views: days.iter().map(|d| d.profile_views).sum(),
            contact_requests: days.iter().map(|d| d.contact_requests).sum(),
            search_impressions: days.iter().map(|d| d.search_impressions).sum(),
            days,
        })
    }
}

impl MatchEvent {
    /// Store the event and bump today's counter for the therapist
    pub async fn record(
        db: &SqlitePool,
        therapist_id: &str,
        event_type: MatchEventType,
        search_query: Option<&serde_json::Value>,
    ) -> Result<(), sqlx::Error> {
        let mut tx = db.begin().await?;

        sqlx::query(
            "INSERT INTO match_events (id, therapist_id, event_type, search_query, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(therapist_id)
        .bind(event_type.as_str())
        .bind(search_query.map(|q| q.to_string()))
        .bind(now_rfc3339())
        .execute(&mut *tx)
        .await?;

        let column = event_type.counter_column();
        let sql = format!(
            r#"
            INSERT INTO therapist_metrics (therapist_id, date, {column})
            VALUES (?, ?, 1)
            ON CONFLICT (therapist_id, date) DO UPDATE SET {column} = {column} + 1
            "#
        );
        sqlx::query(&sql)
            .bind(therapist_id)
            .bind(chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }
}
