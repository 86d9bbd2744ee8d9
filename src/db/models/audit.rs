//! Trail of administrative actions.

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use super::common::{now_rfc3339, Paginated, Pagination};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AdminAuditLog {
    pub id: String,
    /// Profile id, or `system` for the static admin token
    pub admin_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    /// JSON text
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditLogResponse {
    pub id: String,
    pub admin_id: Option<String>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub created_at: String,
}

impl From<AdminAuditLog> for AuditLogResponse {
    fn from(log: AdminAuditLog) -> Self {
        Self {
            details: log
                .details
                .as_deref()
                .and_then(|d| serde_json::from_str(d).ok()),
            id: log.id,
            admin_id: log.admin_id,
            action: log.action,
            resource_type: log.resource_type,
            resource_id: log.resource_id,
            ip_address: log.ip_address,
            created_at: log.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuditLogQuery {
    /// e.g. `therapist.create`
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub admin_id: Option<String>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl AuditLogQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }

    fn push_filters<'q>(&'q self, qb: &mut QueryBuilder<'q, Sqlite>) {
        qb.push(" WHERE 1 = 1");
        if let Some(action) = &self.action {
            qb.push(" AND action = ").push_bind(action.as_str());
        }
        if let Some(resource_type) = &self.resource_type {
            qb.push(" AND resource_type = ").push_bind(resource_type.as_str());
        }
        if let Some(admin_id) = &self.admin_id {
            qb.push(" AND admin_id = ").push_bind(admin_id.as_str());
        }
    }
}

pub mod actions {
    pub const THERAPIST_CREATE: &str = "therapist.create";
    pub const THERAPIST_UPDATE: &str = "therapist.update";
    pub const THERAPIST_DELETE: &str = "therapist.delete";
    pub const THERAPIST_STATUS: &str = "therapist.status";

    pub const PAYMENTS_CALCULATE: &str = "payments.calculate";
    pub const PAYMENT_MARK_PAID: &str = "payment.mark_paid";
    pub const PAYMENT_WAIVE: &str = "payment.waive";

    pub const INVITATION_CREATE: &str = "invitation.create";
    pub const INVITATION_BULK: &str = "invitation.bulk";
    pub const INVITATION_RESEND: &str = "invitation.resend";
    pub const INVITATION_REVOKE: &str = "invitation.revoke";

    pub const SITE_CONTENT_UPDATE: &str = "site_content.update";
}

pub mod resource_types {
    pub const THERAPIST: &str = "therapist";
    pub const PAYMENT: &str = "payment";
    pub const INVITATION: &str = "invitation";
    pub const SITE_CONTENT: &str = "site_content";
}

pub async fn log_audit(
    db: &SqlitePool,
    admin_id: Option<&str>,
    action: &str,
    resource_type: &str,
    resource_id: Option<&str>,
    ip_address: Option<&str>,
    details: Option<serde_json::Value>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO admin_audit_logs (id, admin_id, action, resource_type, resource_id, details, ip_address, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(admin_id)
    .bind(action)
    .bind(resource_type)
    .bind(resource_id)
    .bind(details.map(|d| d.to_string()))
    .bind(ip_address)
    .bind(now_rfc3339())
    .execute(db)
    .await?;

    tracing::debug!(action, resource_type, resource_id, admin_id, "Audit log recorded");
    Ok(())
}

/// Newest first
pub async fn list_audit_logs(
    db: &SqlitePool,
    query: &AuditLogQuery,
) -> Result<Paginated<AuditLogResponse>, sqlx::Error> {
    let pagination = query.pagination();

    let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM admin_audit_logs");
    query.push_filters(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(db).await?;

    let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM admin_audit_logs");
    query.push_filters(&mut select);
    select
        .push(" ORDER BY created_at DESC, rowid DESC LIMIT ")
        .push_bind(pagination.per_page())
        .push(" OFFSET ")
        .push_bind(pagination.offset());
    let rows: Vec<AdminAuditLog> = select.build_query_as().fetch_all(db).await?;

    Ok(Paginated::new(
        rows.into_iter().map(AuditLogResponse::from).collect(),
        total,
        &pagination,
    ))
}
