//! Bi-monthly commission calculation
//!
//! Each month is split into two billing periods, 1st–15th and 16th–end of
//! month. For every billable therapist the calculator counts the completed
//! sessions inside a period, multiplies by the therapist's commission rate
//! (or the platform default) and upserts one payment row per period.
//!
//! Rows that have left `pending` (submitted, paid, overdue, waived) are never
//! rewritten by a recalculation.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use sqlx::SqlitePool;

use super::EngineError;
use crate::config::PaymentsConfig;
use crate::db::{payment_actions, PaymentAction, PaymentDraft, Therapist, TherapistPayment, TherapySession};

/// A half-month billing window, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

impl BillingPeriod {
    /// The period that contains `date`
    pub fn containing(date: NaiveDate) -> Self {
        let (year, month) = (date.year(), date.month());
        if date.day() <= 15 {
            Self {
                start: date.with_day(1).unwrap_or(date),
                end: date.with_day(15).unwrap_or(date),
            }
        } else {
            Self {
                start: date.with_day(16).unwrap_or(date),
                end: last_day_of_month(year, month),
            }
        }
    }

    pub fn previous(&self) -> Self {
        Self::containing(self.start - Duration::days(1))
    }

    pub fn next(&self) -> Self {
        Self::containing(self.end + Duration::days(1))
    }

    pub fn due_date(&self, grace_days: i64) -> NaiveDate {
        self.end + Duration::days(grace_days)
    }

    pub fn start_str(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    pub fn end_str(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

impl std::fmt::Display for BillingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Result of a commission run over one period
#[derive(Debug, Default, Serialize)]
pub struct CommissionRunResult {
    pub period_start: String,
    pub period_end: String,
    /// Number of therapists considered
    pub therapists_processed: usize,
    /// Number of payment rows inserted or refreshed
    pub payments_upserted: usize,
    /// Ids of payments that did not exist before this run
    pub created_payment_ids: Vec<String>,
    /// Number of therapists that failed
    pub errors: usize,
}

/// What happened to a single therapist's payment row
#[derive(Debug, Clone)]
pub enum CommissionOutcome {
    /// No completed sessions, nothing owed
    NoSessions,
    Created(TherapistPayment),
    Updated(TherapistPayment),
    /// Row already moved past `pending`
    Locked(TherapistPayment),
}

pub struct CommissionCalculator {
    db: SqlitePool,
    default_rate_cents: i64,
    grace_days: i64,
}

impl CommissionCalculator {
    pub fn new(db: SqlitePool, config: &PaymentsConfig) -> Self {
        Self {
            db,
            default_rate_cents: config.default_commission_cents,
            grace_days: config.grace_days,
        }
    }

    pub fn effective_rate(&self, therapist: &Therapist) -> i64 {
        therapist
            .commission_rate_cents
            .unwrap_or(self.default_rate_cents)
    }

    /// Compute and store the payment for one therapist and period
    pub async fn calculate_for_therapist(
        &self,
        therapist: &Therapist,
        period: &BillingPeriod,
    ) -> Result<CommissionOutcome, EngineError> {
        let existing =
            TherapistPayment::find_for_period(&self.db, &therapist.id, &period.start_str()).await?;

        if let Some(payment) = &existing {
            if payment.status != "pending" {
                return Ok(CommissionOutcome::Locked(payment.clone()));
            }
        }

        let session_count = TherapySession::count_completed_between(
            &self.db,
            &therapist.id,
            period.start,
            period.end,
        )
        .await?;

        if session_count == 0 {
            return Ok(CommissionOutcome::NoSessions);
        }

        let rate_cents = self.effective_rate(therapist);
        let draft = PaymentDraft {
            therapist_id: therapist.id.clone(),
            period_start: period.start_str(),
            period_end: period.end_str(),
            session_count,
            rate_cents,
            amount_due_cents: session_count * rate_cents,
            due_date: period
                .due_date(self.grace_days)
                .format("%Y-%m-%d")
                .to_string(),
        };

        TherapistPayment::upsert_pending(&self.db, &draft).await?;

        let payment = TherapistPayment::find_for_period(&self.db, &therapist.id, &draft.period_start)
            .await?
            .ok_or(EngineError::NotFound("payment"))?;

        let details = serde_json::json!({
            "session_count": session_count,
            "rate_cents": rate_cents,
            "amount_due_cents": draft.amount_due_cents,
        });

        if existing.is_none() {
            PaymentAction::record(&self.db, &payment.id, payment_actions::CREATED, None, Some(details))
                .await?;
            Ok(CommissionOutcome::Created(payment))
        } else {
            PaymentAction::record(
                &self.db,
                &payment.id,
                payment_actions::RECALCULATED,
                None,
                Some(details),
            )
            .await?;
            Ok(CommissionOutcome::Updated(payment))
        }
    }

    /// Run the calculation for every billable therapist
    pub async fn calculate_period(&self, period: &BillingPeriod) -> Result<CommissionRunResult, EngineError> {
        let therapists = Therapist::list_billable(&self.db).await?;

        let mut result = CommissionRunResult {
            period_start: period.start_str(),
            period_end: period.end_str(),
            therapists_processed: therapists.len(),
            ..Default::default()
        };

        for therapist in &therapists {
            match self.calculate_for_therapist(therapist, period).await {
                Ok(CommissionOutcome::Created(payment)) => {
                    result.payments_upserted += 1;
                    result.created_payment_ids.push(payment.id);
                }
                Ok(CommissionOutcome::Updated(_)) => {
                    result.payments_upserted += 1;
                }
                Ok(CommissionOutcome::NoSessions) | Ok(CommissionOutcome::Locked(_)) => {}
                Err(e) => {
                    result.errors += 1;
                    tracing::warn!(
                        error = %e,
                        therapist_id = %therapist.id,
                        period = %period,
                        "Failed to calculate commission for therapist"
                    );
                }
            }
        }

        tracing::info!(
            period = %period,
            therapists = result.therapists_processed,
            upserted = result.payments_upserted,
            created = result.created_payment_ids.len(),
            errors = result.errors,
            "Commission calculation complete"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use crate::db::{insert_test_therapist, CreateSessionRequest, PaymentStatus, TherapistStatus, UpdateSessionRequest};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_period_boundaries() {
        let first = BillingPeriod::containing(date(2026, 3, 15));
        assert_eq!(first.start, date(2026, 3, 1));
        assert_eq!(first.end, date(2026, 3, 15));

        let second = BillingPeriod::containing(date(2026, 3, 16));
        assert_eq!(second.start, date(2026, 3, 16));
        assert_eq!(second.end, date(2026, 3, 31));

        let april = BillingPeriod::containing(date(2026, 4, 30));
        assert_eq!(april.end, date(2026, 4, 30));
    }

    #[test]
    fn test_leap_february() {
        let leap = BillingPeriod::containing(date(2028, 2, 20));
        assert_eq!(leap.start, date(2028, 2, 16));
        assert_eq!(leap.end, date(2028, 2, 29));

        let common = BillingPeriod::containing(date(2027, 2, 16));
        assert_eq!(common.end, date(2027, 2, 28));
    }

    #[test]
    fn test_previous_and_next_cross_year() {
        let jan_first_half = BillingPeriod::containing(date(2027, 1, 3));
        let prev = jan_first_half.previous();
        assert_eq!(prev.start, date(2026, 12, 16));
        assert_eq!(prev.end, date(2026, 12, 31));
        assert_eq!(prev.next(), jan_first_half);

        let second = BillingPeriod::containing(date(2026, 6, 20));
        assert_eq!(second.previous().start, date(2026, 6, 1));
        assert_eq!(second.next().start, date(2026, 7, 1));
    }

    #[test]
    fn test_due_date() {
        let period = BillingPeriod::containing(date(2026, 3, 20));
        assert_eq!(period.due_date(5), date(2026, 4, 5));
    }

    async fn add_session(db: &SqlitePool, therapist_id: &str, at: &str, status: &str) {
        let req = CreateSessionRequest {
            scheduled_at: at.to_string(),
            ..Default::default()
        };
        let session = TherapySession::create(db, therapist_id, &req, at).await.unwrap();
        TherapySession::update(
            db,
            therapist_id,
            &session.id,
            &UpdateSessionRequest {
                status: Some(status.to_string()),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_amount_counts_only_completed_sessions_in_range() {
        let db = test_pool().await;
        let t = insert_test_therapist(&db, "Rita Rate", TherapistStatus::Active).await;

        add_session(&db, &t.id, "2026-03-01T09:00:00Z", "completed").await;
        add_session(&db, &t.id, "2026-03-15T18:00:00Z", "completed").await;
        add_session(&db, &t.id, "2026-03-10T09:00:00Z", "cancelled").await;
        add_session(&db, &t.id, "2026-03-16T09:00:00Z", "completed").await;
        add_session(&db, &t.id, "2026-02-28T09:00:00Z", "completed").await;

        let calc = CommissionCalculator::new(db.clone(), &PaymentsConfig::default());
        let period = BillingPeriod::containing(date(2026, 3, 5));
        let outcome = calc.calculate_for_therapist(&t, &period).await.unwrap();

        let CommissionOutcome::Created(payment) = outcome else {
            panic!("expected a new payment, got {:?}", outcome);
        };
        assert_eq!(payment.session_count, 2);
        assert_eq!(payment.rate_cents, 1000);
        assert_eq!(payment.amount_due_cents, 2000);
        assert_eq!(payment.due_date, "2026-03-20");
        assert_eq!(payment.status, "pending");
    }

    #[tokio::test]
    async fn test_per_therapist_rate_and_recalculation() {
        let db = test_pool().await;
        let mut t = insert_test_therapist(&db, "Sam Special", TherapistStatus::Active).await;
        t.commission_rate_cents = Some(1500);
        sqlx::query("UPDATE therapists SET commission_rate_cents = 1500 WHERE id = ?")
            .bind(&t.id)
            .execute(&db)
            .await
            .unwrap();

        add_session(&db, &t.id, "2026-05-20T09:00:00Z", "completed").await;

        let calc = CommissionCalculator::new(db.clone(), &PaymentsConfig::default());
        let period = BillingPeriod::containing(date(2026, 5, 20));
        assert!(matches!(
            calc.calculate_for_therapist(&t, &period).await.unwrap(),
            CommissionOutcome::Created(_)
        ));

        add_session(&db, &t.id, "2026-05-21T09:00:00Z", "completed").await;
        let CommissionOutcome::Updated(payment) = calc.calculate_for_therapist(&t, &period).await.unwrap() else {
            panic!("expected an update");
        };
        assert_eq!(payment.amount_due_cents, 3000);

        // Once paid the row is frozen
        TherapistPayment::set_status(&db, &payment.id, PaymentStatus::Paid, Some("ref-1"))
            .await
            .unwrap();
        add_session(&db, &t.id, "2026-05-22T09:00:00Z", "completed").await;
        let CommissionOutcome::Locked(locked) = calc.calculate_for_therapist(&t, &period).await.unwrap() else {
            panic!("expected the paid row to be locked");
        };
        assert_eq!(locked.amount_due_cents, 3000);
        assert_eq!(locked.status, "paid");
    }

    #[tokio::test]
    async fn test_calculate_period_skips_inactive_and_empty() {
        let db = test_pool().await;
        let active = insert_test_therapist(&db, "Ada Active", TherapistStatus::Active).await;
        let idle = insert_test_therapist(&db, "Ivan Idle", TherapistStatus::Active).await;
        let inactive = insert_test_therapist(&db, "Nia Inactive", TherapistStatus::Inactive).await;

        add_session(&db, &active.id, "2026-07-02T09:00:00Z", "completed").await;
        add_session(&db, &inactive.id, "2026-07-02T11:00:00Z", "completed").await;

        let calc = CommissionCalculator::new(db.clone(), &PaymentsConfig::default());
        let result = calc
            .calculate_period(&BillingPeriod::containing(date(2026, 7, 1)))
            .await
            .unwrap();

        assert_eq!(result.therapists_processed, 2);
        assert_eq!(result.payments_upserted, 1);
        assert_eq!(result.created_payment_ids.len(), 1);
        assert_eq!(result.errors, 0);

        let none = TherapistPayment::find_for_period(&db, &idle.id, "2026-07-01").await.unwrap();
        assert!(none.is_none());

        let actions = PaymentAction::list_for_payment(&db, &result.created_payment_ids[0])
            .await
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, payment_actions::CREATED);
    }
}
