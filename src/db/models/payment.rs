//! Commission payment models and their action history.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite, SqlitePool};

use super::common::now_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Submitted,
    Paid,
    Overdue,
    Waived,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Submitted => "submitted",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Overdue => "overdue",
            PaymentStatus::Waived => "waived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "submitted" => Some(PaymentStatus::Submitted),
            "paid" => Some(PaymentStatus::Paid),
            "overdue" => Some(PaymentStatus::Overdue),
            "waived" => Some(PaymentStatus::Waived),
            _ => None,
        }
    }

    /// Nothing more is owed
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Waived)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TherapistPayment {
    pub id: String,
    pub therapist_id: String,
    pub period_start: String,
    pub period_end: String,
    pub session_count: i64,
    pub rate_cents: i64,
    pub amount_due_cents: i64,
    pub due_date: String,
    pub status: String,
    pub payment_reference: Option<String>,
    pub paid_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PaymentAction {
    pub id: String,
    pub payment_id: String,
    pub action: String,
    pub actor_id: Option<String>,
    pub details: Option<String>,
    pub created_at: String,
}

/// Values recorded in `therapist_payment_actions.action`
pub mod payment_actions {
    pub const CREATED: &str = "created";
    pub const RECALCULATED: &str = "recalculated";
    pub const NOTIFICATION_SCHEDULED: &str = "notification_scheduled";
    pub const REMINDER_SENT: &str = "reminder_sent";
    pub const DEADLINE_NOTICE: &str = "deadline_notice";
    pub const WARNING_SENT: &str = "warning_sent";
    pub const THERAPIST_SUSPENDED: &str = "therapist_suspended";
    pub const MARKED_SUBMITTED: &str = "marked_submitted";
    pub const MARKED_PAID: &str = "marked_paid";
    pub const WAIVED: &str = "waived";
    pub const THERAPIST_REACTIVATED: &str = "therapist_reactivated";
}

/// Computed values for one therapist and period
#[derive(Debug, Clone)]
pub struct PaymentDraft {
    pub therapist_id: String,
    pub period_start: String,
    pub period_end: String,
    pub session_count: i64,
    pub rate_cents: i64,
    pub amount_due_cents: i64,
    pub due_date: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PaymentListQuery {
    pub status: Option<String>,
    pub therapist_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SubmitPaymentRequest {
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CalculatePaymentsRequest {
    /// Any date; the period before the one containing it is closed
    pub date: Option<String>,
}

impl TherapistPayment {
    pub fn status_enum(&self) -> Option<PaymentStatus> {
        PaymentStatus::from_str(&self.status)
    }

    pub async fn find_by_id(
        db: &SqlitePool,
        id: &str,
    ) -> Result<Option<TherapistPayment>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM therapist_payments WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await
    }

    pub async fn find_for_period(
        db: &SqlitePool,
        therapist_id: &str,
        period_start: &str,
    ) -> Result<Option<TherapistPayment>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM therapist_payments WHERE therapist_id = ? AND period_start = ?",
        )
        .bind(therapist_id)
        .bind(period_start)
        .fetch_optional(db)
        .await
    }

    /// Insert the draft, or refresh the amounts of an existing row that is
    /// still `pending`. Rows in any other state are left as they are.
    pub async fn upsert_pending(
        db: &SqlitePool,
        draft: &PaymentDraft,
    ) -> Result<(), sqlx::Error> {
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO therapist_payments (
                id, therapist_id, period_start, period_end, session_count, rate_cents,
                amount_due_cents, due_date, status, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            ON CONFLICT (therapist_id, period_start) DO UPDATE SET
                session_count = excluded.session_count,
                rate_cents = excluded.rate_cents,
                amount_due_cents = excluded.amount_due_cents,
                period_end = excluded.period_end,
                due_date = excluded.due_date,
                updated_at = excluded.updated_at
            WHERE therapist_payments.status = 'pending'
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&draft.therapist_id)
        .bind(&draft.period_start)
        .bind(&draft.period_end)
        .bind(draft.session_count)
        .bind(draft.rate_cents)
        .bind(draft.amount_due_cents)
        .bind(&draft.due_date)
        .bind(&now)
        .bind(&now)
        .execute(db)
        .await?;
        Ok(())
    }

    pub async fn list(
        db: &SqlitePool,
        query: &PaymentListQuery,
    ) -> Result<Vec<TherapistPayment>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM therapist_payments
            WHERE (? IS NULL OR status = ?) AND (? IS NULL OR therapist_id = ?)
            ORDER BY period_start DESC, created_at DESC
            "#,
        )
        .bind(&query.status)
        .bind(&query.status)
        .bind(&query.therapist_id)
        .bind(&query.therapist_id)
        .fetch_all(db)
        .await
    }

    pub async fn list_for_therapist(
        db: &SqlitePool,
        therapist_id: &str,
    ) -> Result<Vec<TherapistPayment>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM therapist_payments WHERE therapist_id = ? ORDER BY period_start DESC",
        )
        .bind(therapist_id)
        .fetch_all(db)
        .await
    }

    pub async fn set_status<'e, E>(
        executor: E,
        id: &str,
        status: PaymentStatus,
        reference: Option<&str>,
    ) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let now = now_rfc3339();
        let paid_at = (status == PaymentStatus::Paid).then(|| now.clone());
        sqlx::query(
            r#"
            UPDATE therapist_payments SET
                status = ?,
                payment_reference = COALESCE(?, payment_reference),
                paid_at = COALESCE(?, paid_at),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(reference)
        .bind(paid_at)
        .bind(&now)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Unpaid (pending, submitted or overdue) payments for a therapist other than `exclude_id`
    pub async fn count_unpaid_for_therapist(
        db: &SqlitePool,
        therapist_id: &str,
        exclude_id: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM therapist_payments WHERE therapist_id = ? AND id != ? \
             AND status IN ('pending', 'submitted', 'overdue')",
        )
        .bind(therapist_id)
        .bind(exclude_id)
        .fetch_one(db)
        .await
    }

    pub async fn count_by_status(db: &SqlitePool, status: PaymentStatus) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM therapist_payments WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(db)
            .await
    }
}

impl PaymentAction {
    pub async fn record<'e, E>(
        executor: E,
        payment_id: &str,
        action: &str,
        actor_id: Option<&str>,
        details: Option<serde_json::Value>,
    ) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO therapist_payment_actions (id, payment_id, action, actor_id, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(payment_id)
        .bind(action)
        .bind(actor_id)
        .bind(details.map(|d| d.to_string()))
        .bind(now_rfc3339())
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Insert unless the same once-only action is already recorded.
    /// Returns false when another writer recorded it first.
    pub async fn record_once<'e, E>(
        executor: E,
        payment_id: &str,
        action: &str,
        details: Option<serde_json::Value>,
    ) -> Result<bool, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO therapist_payment_actions (id, payment_id, action, actor_id, details, created_at)
            VALUES (?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(payment_id)
        .bind(action)
        .bind(details.map(|d| d.to_string()))
        .bind(now_rfc3339())
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn exists(db: &SqlitePool, payment_id: &str, action: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM therapist_payment_actions WHERE payment_id = ? AND action = ?",
        )
        .bind(payment_id)
        .bind(action)
        .fetch_one(db)
        .await?;
        Ok(count > 0)
    }

    pub async fn list_for_payment(
        db: &SqlitePool,
        payment_id: &str,
    ) -> Result<Vec<PaymentAction>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM therapist_payment_actions WHERE payment_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(payment_id)
        .fetch_all(db)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_test_therapist, test_pool, TherapistStatus};

    #[tokio::test]
    async fn test_stage_actions_are_recorded_once() {
        let db = test_pool().await;
        let t = insert_test_therapist(&db, "Olga Once", TherapistStatus::Active).await;
        TherapistPayment::upsert_pending(
            &db,
            &PaymentDraft {
                therapist_id: t.id.clone(),
                period_start: "2026-04-01".into(),
                period_end: "2026-04-15".into(),
                session_count: 1,
                rate_cents: 1000,
                amount_due_cents: 1000,
                due_date: "2026-04-20".into(),
            },
        )
        .await
        .unwrap();
        let payment = TherapistPayment::find_for_period(&db, &t.id, "2026-04-01")
            .await
            .unwrap()
            .unwrap();

        assert!(PaymentAction::record_once(&db, &payment.id, payment_actions::WARNING_SENT, None)
            .await
            .unwrap());
        assert!(!PaymentAction::record_once(&db, &payment.id, payment_actions::WARNING_SENT, None)
            .await
            .unwrap());

        // A plain insert of a stage action hits the unique index
        let dup = PaymentAction::record(&db, &payment.id, payment_actions::WARNING_SENT, None, None).await;
        assert!(dup.is_err());

        // Other actions may repeat
        PaymentAction::record(&db, &payment.id, payment_actions::RECALCULATED, None, None)
            .await
            .unwrap();
        PaymentAction::record(&db, &payment.id, payment_actions::RECALCULATED, None, None)
            .await
            .unwrap();

        let actions = PaymentAction::list_for_payment(&db, &payment.id).await.unwrap();
        let count = |name: &str| actions.iter().filter(|a| a.action == name).count();
        assert_eq!(count(payment_actions::WARNING_SENT), 1);
        assert_eq!(count(payment_actions::RECALCULATED), 2);
    }
}
