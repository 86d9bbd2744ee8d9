//! Editable site copy, stored as JSON keyed by a short name.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use super::common::now_rfc3339;

#[derive(Debug, Clone, FromRow)]
pub struct SiteContent {
    pub key: String,
    pub value: String,
    pub updated_by: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteContentResponse {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: String,
}

impl From<SiteContent> for SiteContentResponse {
    fn from(content: SiteContent) -> Self {
        Self {
            value: serde_json::from_str(&content.value)
                .unwrap_or(serde_json::Value::String(content.value)),
            key: content.key,
            updated_at: content.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSiteContentRequest {
    pub value: serde_json::Value,
}

impl SiteContent {
    pub async fn get(db: &SqlitePool, key: &str) -> Result<Option<SiteContent>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM site_content WHERE key = ?")
            .bind(key)
            .fetch_optional(db)
            .await
    }

    pub async fn upsert(
        db: &SqlitePool,
        key: &str,
        value: &serde_json::Value,
        updated_by: Option<&str>,
    ) -> Result<SiteContent, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO site_content (key, value, updated_by, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                updated_by = excluded.updated_by,
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .bind(updated_by)
        .bind(now_rfc3339())
        .fetch_one(db)
        .await
    }
}
