//! Scheduled close of billing periods.
//!
//! On each cron tick the period before the current one is calculated and the
//! notification stages for newly created payments are enqueued.

use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use cron::Schedule;
use serde::Serialize;
use tokio::time::Duration;

use super::{BillingPeriod, CommissionCalculator, CommissionRunResult, EngineError, PaymentNotifier};
use crate::config::PaymentsConfig;
use crate::DbPool;

#[derive(Debug, Serialize)]
pub struct PaymentCycleReport {
    #[serde(flatten)]
    pub commission: CommissionRunResult,
    pub notifications_scheduled: usize,
}

pub struct PaymentCycle {
    calculator: CommissionCalculator,
    notifier: PaymentNotifier,
}

impl PaymentCycle {
    pub fn new(db: DbPool, config: &PaymentsConfig, notifier: PaymentNotifier) -> Self {
        Self {
            calculator: CommissionCalculator::new(db, config),
            notifier,
        }
    }

    /// Close the period before the one containing `date`
    pub async fn run_for_date(&self, date: NaiveDate) -> Result<PaymentCycleReport, EngineError> {
        let period = BillingPeriod::containing(date).previous();
        let commission = self.calculator.calculate_period(&period).await?;
        let notifications_scheduled = self
            .notifier
            .schedule_payments(&commission.created_payment_ids, Utc::now())
            .await;

        Ok(PaymentCycleReport {
            commission,
            notifications_scheduled,
        })
    }
}

/// Spawn the background payment cycle task
pub fn spawn_payment_cycle_task(db: DbPool, config: PaymentsConfig, notifier: PaymentNotifier) {
    if !config.cycle_enabled {
        tracing::info!("Payment cycle is disabled");
        return;
    }

    let schedule = match Schedule::from_str(&config.cycle_cron) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(cron = %config.cycle_cron, error = %e, "Invalid payment cycle cron expression");
            return;
        }
    };

    tracing::info!(cron = %config.cycle_cron, "Starting payment cycle task");
    let cycle = PaymentCycle::new(db, &config, notifier);

    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                tracing::warn!("Payment cycle schedule has no upcoming runs, stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tracing::debug!(next_run = %next, "Payment cycle sleeping");
            tokio::time::sleep(wait).await;

            match cycle.run_for_date(next.date_naive()).await {
                Ok(report) => tracing::info!(
                    period_start = %report.commission.period_start,
                    created = report.commission.created_payment_ids.len(),
                    notifications = report.notifications_scheduled,
                    "Payment cycle completed"
                ),
                Err(e) => tracing::error!(error = %e, "Payment cycle failed"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use crate::db::{insert_test_therapist, test_pool, CreateSessionRequest, TherapistStatus, TherapySession, UpdateSessionRequest};
    use crate::engine::RecordingScheduler;
    use std::sync::Arc;

    #[test]
    fn test_default_cron_parses() {
        let schedule = Schedule::from_str(&PaymentsConfig::default().cycle_cron).unwrap();
        let next = schedule.upcoming(Utc).next().unwrap();
        assert!(next.format("%d").to_string() == "01" || next.format("%d").to_string() == "16");
    }

    #[tokio::test]
    async fn test_run_closes_previous_period() {
        let db = test_pool().await;
        let t = insert_test_therapist(&db, "Cora Cycle", TherapistStatus::Active).await;
        let s = TherapySession::create(
            &db,
            &t.id,
            &CreateSessionRequest::default(),
            "2099-01-20T10:00:00Z",
        )
        .await
        .unwrap();
        TherapySession::update(
            &db,
            &t.id,
            &s.id,
            &UpdateSessionRequest {
                status: Some("completed".into()),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

        let recorder = Arc::new(RecordingScheduler::default());
        let config = PaymentsConfig::default();
        let notifier = PaymentNotifier::new(db.clone(), recorder.clone(), &SiteConfig::default(), &config);
        let cycle = PaymentCycle::new(db.clone(), &config, notifier);

        let report = cycle
            .run_for_date(NaiveDate::from_ymd_opt(2099, 2, 1).unwrap())
            .await
            .unwrap();

        assert_eq!(report.commission.period_start, "2099-01-16");
        assert_eq!(report.commission.period_end, "2099-01-31");
        assert_eq!(report.commission.created_payment_ids.len(), 1);
        assert_eq!(report.notifications_scheduled, 4);
        assert_eq!(recorder.published.lock().unwrap().len(), 4);
    }
}
