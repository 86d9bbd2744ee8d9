//! Handling of a delivered payment notification stage.
//!
//! Deliveries are at-least-once, so every call re-reads the payment and its
//! action history before acting. Each stage takes effect at most once: the
//! completion action is claimed inside the same transaction as the stage's
//! effects, and a unique index on once-only actions settles concurrent claims.

use serde::Serialize;
use serde_json::json;

use super::{EngineError, NotificationStage};
use crate::api::metrics::record_payment_notification;
use crate::db::{PaymentAction, PaymentStatus, Therapist, TherapistPayment, TherapistStatus};
use crate::notifications::EmailService;
use crate::DbPool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Processed {
        action: &'static str,
        email_sent: bool,
    },
    AlreadySettled,
    AlreadyProcessed,
}

impl StageOutcome {
    /// Value for the `skipped` field of the webhook response
    pub fn skipped_reason(&self) -> Option<&'static str> {
        match self {
            StageOutcome::Processed { .. } => None,
            StageOutcome::AlreadySettled => Some("already_settled"),
            StageOutcome::AlreadyProcessed => Some("already_processed"),
        }
    }
}

pub async fn process_stage(
    db: &DbPool,
    email: &EmailService,
    payment_id: &str,
    stage: NotificationStage,
) -> Result<StageOutcome, EngineError> {
    let payment = TherapistPayment::find_by_id(db, payment_id)
        .await?
        .ok_or(EngineError::NotFound("payment"))?;

    let status = payment
        .status_enum()
        .ok_or_else(|| EngineError::InvalidState(payment.status.clone()))?;
    if status.is_settled() {
        tracing::debug!(payment_id = %payment_id, stage = %stage, "Payment settled, skipping stage");
        return Ok(StageOutcome::AlreadySettled);
    }

    let action = stage.completion_action();
    if PaymentAction::exists(db, payment_id, action).await? {
        tracing::debug!(payment_id = %payment_id, stage = %stage, "Stage already processed");
        return Ok(StageOutcome::AlreadyProcessed);
    }

    let therapist = Therapist::find_by_id(db, &payment.therapist_id)
        .await?
        .ok_or(EngineError::NotFound("therapist"))?;

    let mut tx = db.begin().await?;
    let mut details = json!({ "stage": stage });

    match stage {
        NotificationStage::Reminder | NotificationStage::Deadline => {}
        NotificationStage::Warning => {
            if matches!(status, PaymentStatus::Pending | PaymentStatus::Submitted) {
                TherapistPayment::set_status(&mut *tx, &payment.id, PaymentStatus::Overdue, None)
                    .await?;
                details["previous_status"] = json!(status);
            }
        }
        NotificationStage::Suspension => {
            if therapist.status_enum() == Some(TherapistStatus::Active) {
                Therapist::set_status(&mut *tx, &therapist.id, TherapistStatus::Suspended).await?;
                details["therapist_suspended"] = json!(true);
            }
        }
    }

    if !PaymentAction::record_once(&mut *tx, &payment.id, action, Some(details)).await? {
        tx.rollback().await?;
        tracing::debug!(payment_id = %payment_id, stage = %stage, "Stage claimed by a concurrent delivery");
        return Ok(StageOutcome::AlreadyProcessed);
    }
    tx.commit().await?;

    record_payment_notification(stage);

    tracing::info!(
        payment_id = %payment.id,
        therapist_id = %therapist.id,
        stage = %stage,
        "Payment notification stage processed"
    );

    let email_sent = match email
        .send_payment_notice(&therapist.email, &therapist, &payment, stage)
        .await
    {
        Ok(sent) => sent,
        Err(e) => {
            tracing::warn!(
                payment_id = %payment.id,
                stage = %stage,
                error = %e,
                "Failed to send payment notice"
            );
            false
        }
    };

    if stage == NotificationStage::Suspension {
        if let Some(admin) = email.admin_address() {
            if let Err(e) = email
                .send_payment_notice(admin, &therapist, &payment, stage)
                .await
            {
                tracing::warn!(error = %e, "Failed to copy suspension notice to admin");
            }
        }
    }

    Ok(StageOutcome::Processed { action, email_sent })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmailConfig, SiteConfig};
    use crate::db::{insert_test_therapist, payment_actions, test_pool, PaymentDraft};

    fn email() -> EmailService {
        EmailService::new(EmailConfig::default(), SiteConfig::default(), "USD".into())
    }

    async fn setup(db: &DbPool) -> (Therapist, TherapistPayment) {
        let t = insert_test_therapist(db, "Paula Pending", TherapistStatus::Active).await;
        let draft = PaymentDraft {
            therapist_id: t.id.clone(),
            period_start: "2026-03-01".into(),
            period_end: "2026-03-15".into(),
            session_count: 2,
            rate_cents: 1000,
            amount_due_cents: 2000,
            due_date: "2026-03-20".into(),
        };
        TherapistPayment::upsert_pending(db, &draft).await.unwrap();
        let p = TherapistPayment::find_for_period(db, &t.id, "2026-03-01")
            .await
            .unwrap()
            .unwrap();
        (t, p)
    }

    #[tokio::test]
    async fn test_reminder_acts_once() {
        let db = test_pool().await;
        let (_, payment) = setup(&db).await;

        let first = process_stage(&db, &email(), &payment.id, NotificationStage::Reminder)
            .await
            .unwrap();
        assert_eq!(
            first,
            StageOutcome::Processed {
                action: payment_actions::REMINDER_SENT,
                email_sent: false
            }
        );

        let second = process_stage(&db, &email(), &payment.id, NotificationStage::Reminder)
            .await
            .unwrap();
        assert_eq!(second, StageOutcome::AlreadyProcessed);

        let actions = PaymentAction::list_for_payment(&db, &payment.id).await.unwrap();
        assert_eq!(
            actions
                .iter()
                .filter(|a| a.action == payment_actions::REMINDER_SENT)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_act_once() {
        let db = test_pool().await;
        let (therapist, payment) = setup(&db).await;
        let email = email();

        let (a, b) = tokio::join!(
            process_stage(&db, &email, &payment.id, NotificationStage::Suspension),
            process_stage(&db, &email, &payment.id, NotificationStage::Suspension),
        );
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, StageOutcome::Processed { .. }))
                .count(),
            1
        );
        assert!(outcomes.contains(&StageOutcome::AlreadyProcessed));

        let actions = PaymentAction::list_for_payment(&db, &payment.id).await.unwrap();
        assert_eq!(
            actions
                .iter()
                .filter(|a| a.action == payment_actions::THERAPIST_SUSPENDED)
                .count(),
            1
        );
        let t = Therapist::find_by_id(&db, &therapist.id).await.unwrap().unwrap();
        assert_eq!(t.status, "suspended");
    }

    #[tokio::test]
    async fn test_warning_marks_overdue_and_suspension_suspends() {
        let db = test_pool().await;
        let (therapist, payment) = setup(&db).await;

        process_stage(&db, &email(), &payment.id, NotificationStage::Warning)
            .await
            .unwrap();
        let updated = TherapistPayment::find_by_id(&db, &payment.id).await.unwrap().unwrap();
        assert_eq!(updated.status, "overdue");

        process_stage(&db, &email(), &payment.id, NotificationStage::Suspension)
            .await
            .unwrap();
        let t = Therapist::find_by_id(&db, &therapist.id).await.unwrap().unwrap();
        assert_eq!(t.status, "suspended");
    }

    #[tokio::test]
    async fn test_settled_payment_is_skipped() {
        let db = test_pool().await;
        let (therapist, payment) = setup(&db).await;
        TherapistPayment::set_status(&db, &payment.id, PaymentStatus::Paid, Some("bank-1"))
            .await
            .unwrap();

        let outcome = process_stage(&db, &email(), &payment.id, NotificationStage::Suspension)
            .await
            .unwrap();
        assert_eq!(outcome, StageOutcome::AlreadySettled);
        assert_eq!(outcome.skipped_reason(), Some("already_settled"));

        let t = Therapist::find_by_id(&db, &therapist.id).await.unwrap().unwrap();
        assert_eq!(t.status, "active");
    }

    #[tokio::test]
    async fn test_unknown_payment() {
        let db = test_pool().await;
        let err = process_stage(&db, &email(), "missing", NotificationStage::Deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound("payment")));
    }
}
