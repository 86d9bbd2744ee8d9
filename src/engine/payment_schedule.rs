//! Staged payment notifications
//!
//! Every payment gets up to four delayed webhook callbacks around its due
//! date. Delivery timing and retries belong to an external scheduled-message
//! service reached through [`MessageScheduler`]; the callbacks come back to
//! `POST /webhooks/payment-notifications`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::EngineError;
use crate::config::{PaymentsConfig, SchedulerConfig, SiteConfig};
use crate::db::{payment_actions, PaymentAction, TherapistPayment};
use crate::DbPool;

pub const WEBHOOK_PATH: &str = "/webhooks/payment-notifications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStage {
    Reminder,
    Deadline,
    Warning,
    Suspension,
}

impl NotificationStage {
    pub const ALL: [NotificationStage; 4] = [
        NotificationStage::Reminder,
        NotificationStage::Deadline,
        NotificationStage::Warning,
        NotificationStage::Suspension,
    ];

    /// Days relative to the due date
    pub fn offset_days(&self) -> i64 {
        match self {
            NotificationStage::Reminder => -3,
            NotificationStage::Deadline => 0,
            NotificationStage::Warning => 3,
            NotificationStage::Suspension => 6,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStage::Reminder => "reminder",
            NotificationStage::Deadline => "deadline",
            NotificationStage::Warning => "warning",
            NotificationStage::Suspension => "suspension",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "reminder" => Some(NotificationStage::Reminder),
            "deadline" => Some(NotificationStage::Deadline),
            "warning" => Some(NotificationStage::Warning),
            "suspension" => Some(NotificationStage::Suspension),
            _ => None,
        }
    }

    /// Payment action written once the stage has been handled
    pub fn completion_action(&self) -> &'static str {
        match self {
            NotificationStage::Reminder => payment_actions::REMINDER_SENT,
            NotificationStage::Deadline => payment_actions::DEADLINE_NOTICE,
            NotificationStage::Warning => payment_actions::WARNING_SENT,
            NotificationStage::Suspension => payment_actions::THERAPIST_SUSPENDED,
        }
    }
}

impl std::fmt::Display for NotificationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedNotification {
    pub stage: NotificationStage,
    pub deliver_at: DateTime<Utc>,
}

/// Stages for `due_date` that are still ahead of `now`
pub fn plan(due_date: NaiveDate, notification_hour_utc: u32, now: DateTime<Utc>) -> Vec<PlannedNotification> {
    let hour = notification_hour_utc.min(23);
    NotificationStage::ALL
        .iter()
        .filter_map(|stage| {
            let day = due_date + Duration::days(stage.offset_days());
            let naive = day.and_hms_opt(hour, 0, 0)?;
            let deliver_at = Utc.from_utc_datetime(&naive);
            (deliver_at > now).then_some(PlannedNotification {
                stage: *stage,
                deliver_at,
            })
        })
        .collect()
}

/// Body posted back to the webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMessage {
    pub payment_id: String,
    pub stage: NotificationStage,
}

/// Delayed delivery of a JSON body to a URL
#[async_trait]
pub trait MessageScheduler: Send + Sync {
    /// Returns the provider's message id
    async fn publish(
        &self,
        destination: &str,
        body: &serde_json::Value,
        deliver_at: DateTime<Utc>,
    ) -> Result<String, EngineError>;
}

/// Client for a QStash-style scheduled-message HTTP API
pub struct HttpMessageScheduler {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpMessageScheduler {
    pub fn new(base_url: &str, token: &str) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(format!("therapydesk/{}", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_default();

        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    message_id: String,
}

#[async_trait]
impl MessageScheduler for HttpMessageScheduler {
    async fn publish(
        &self,
        destination: &str,
        body: &serde_json::Value,
        deliver_at: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        let url = format!("{}/v2/publish/{}", self.base_url, destination);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Upstash-Not-Before", deliver_at.timestamp().to_string())
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::Scheduler(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Scheduler(format!(
                "publish failed with status {}: {}",
                status, text
            )));
        }

        let parsed: PublishResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Scheduler(format!("invalid publish response: {}", e)))?;

        Ok(parsed.message_id)
    }
}

/// Used when no scheduler token is configured
pub struct DisabledScheduler;

#[async_trait]
impl MessageScheduler for DisabledScheduler {
    async fn publish(
        &self,
        destination: &str,
        _body: &serde_json::Value,
        _deliver_at: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        tracing::warn!(destination = %destination, "Message scheduler not configured, skipping publish");
        Err(EngineError::Scheduler("scheduler not configured".to_string()))
    }
}

/// Build the scheduler from config
pub fn scheduler_from_config(config: &SchedulerConfig) -> Arc<dyn MessageScheduler> {
    match config.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => Arc::new(HttpMessageScheduler::new(&config.base_url, token)),
        None => {
            tracing::info!("No scheduler token configured, payment notifications are disabled");
            Arc::new(DisabledScheduler)
        }
    }
}

/// Enqueues the notification stages for payments
#[derive(Clone)]
pub struct PaymentNotifier {
    db: DbPool,
    scheduler: Arc<dyn MessageScheduler>,
    destination: String,
    notification_hour_utc: u32,
}

impl PaymentNotifier {
    pub fn new(
        db: DbPool,
        scheduler: Arc<dyn MessageScheduler>,
        site: &SiteConfig,
        payments: &PaymentsConfig,
    ) -> Self {
        Self {
            db,
            scheduler,
            destination: site.url(WEBHOOK_PATH),
            notification_hour_utc: payments.notification_hour_utc,
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Enqueue every remaining stage for `payment`. Returns how many were
    /// accepted by the scheduler; a failed stage does not stop the others.
    pub async fn schedule_payment(
        &self,
        payment: &TherapistPayment,
        now: DateTime<Utc>,
    ) -> Result<usize, EngineError> {
        let due_date = NaiveDate::parse_from_str(&payment.due_date, "%Y-%m-%d")
            .map_err(|_| EngineError::InvalidDate(payment.due_date.clone()))?;

        let mut scheduled = 0;
        for planned in plan(due_date, self.notification_hour_utc, now) {
            let body = serde_json::to_value(StageMessage {
                payment_id: payment.id.clone(),
                stage: planned.stage,
            })
            .map_err(|e| EngineError::Scheduler(e.to_string()))?;

            match self
                .scheduler
                .publish(&self.destination, &body, planned.deliver_at)
                .await
            {
                Ok(message_id) => {
                    PaymentAction::record(
                        &self.db,
                        &payment.id,
                        payment_actions::NOTIFICATION_SCHEDULED,
                        None,
                        Some(json!({
                            "stage": planned.stage,
                            "deliver_at": planned.deliver_at.to_rfc3339(),
                            "message_id": message_id,
                        })),
                    )
                    .await?;
                    scheduled += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        payment_id = %payment.id,
                        stage = %planned.stage,
                        error = %e,
                        "Failed to schedule payment notification"
                    );
                }
            }
        }

        tracing::debug!(payment_id = %payment.id, scheduled, "Payment notifications scheduled");
        Ok(scheduled)
    }

    /// Schedule by id, skipping ids that no longer exist
    pub async fn schedule_payments(&self, payment_ids: &[String], now: DateTime<Utc>) -> usize {
        let mut total = 0;
        for id in payment_ids {
            let payment = match TherapistPayment::find_by_id(&self.db, id).await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(payment_id = %id, error = %e, "Failed to load payment for scheduling");
                    continue;
                }
            };
            match self.schedule_payment(&payment, now).await {
                Ok(n) => total += n,
                Err(e) => {
                    tracing::warn!(payment_id = %id, error = %e, "Failed to schedule payment notifications");
                }
            }
        }
        total
    }
}

/// Test double that records publishes instead of sending them
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingScheduler {
    pub published: std::sync::Mutex<Vec<(String, serde_json::Value, DateTime<Utc>)>>,
    pub fail_stage: Option<NotificationStage>,
}

#[cfg(test)]
#[async_trait]
impl MessageScheduler for RecordingScheduler {
    async fn publish(
        &self,
        destination: &str,
        body: &serde_json::Value,
        deliver_at: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        if let Some(stage) = self.fail_stage {
            if body["stage"] == stage.as_str() {
                return Err(EngineError::Scheduler("boom".to_string()));
            }
        }
        let mut published = self.published.lock().unwrap();
        published.push((destination.to_string(), body.clone(), deliver_at));
        Ok(format!("msg_{}", published.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{insert_test_therapist, test_pool, PaymentDraft, TherapistStatus};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_plan_has_four_stages_at_offsets() {
        let due = NaiveDate::from_ymd_opt(2026, 4, 5).unwrap();
        let planned = plan(due, 9, at("2026-03-20T00:00:00Z"));

        assert_eq!(planned.len(), 4);
        assert_eq!(planned[0].stage, NotificationStage::Reminder);
        assert_eq!(planned[0].deliver_at, at("2026-04-02T09:00:00Z"));
        assert_eq!(planned[1].deliver_at, at("2026-04-05T09:00:00Z"));
        assert_eq!(planned[2].deliver_at, at("2026-04-08T09:00:00Z"));
        assert_eq!(planned[3].stage, NotificationStage::Suspension);
        assert_eq!(planned[3].deliver_at, at("2026-04-11T09:00:00Z"));
    }

    #[test]
    fn test_plan_drops_past_stages() {
        let due = NaiveDate::from_ymd_opt(2026, 4, 5).unwrap();
        let planned = plan(due, 9, at("2026-04-05T09:00:00Z"));
        let stages: Vec<_> = planned.iter().map(|p| p.stage).collect();
        assert_eq!(stages, vec![NotificationStage::Warning, NotificationStage::Suspension]);

        assert!(plan(due, 9, at("2026-05-01T00:00:00Z")).is_empty());
    }

    #[test]
    fn test_stage_round_trip_names() {
        for stage in NotificationStage::ALL {
            assert_eq!(NotificationStage::from_str(stage.as_str()), Some(stage));
        }
        assert_eq!(NotificationStage::from_str("final"), None);
    }

    async fn pending_payment(db: &DbPool, due_date: &str) -> TherapistPayment {
        let t = insert_test_therapist(db, "Nora Notify", TherapistStatus::Active).await;
        let draft = PaymentDraft {
            therapist_id: t.id.clone(),
            period_start: "2026-03-16".into(),
            period_end: "2026-03-31".into(),
            session_count: 3,
            rate_cents: 1000,
            amount_due_cents: 3000,
            due_date: due_date.into(),
        };
        TherapistPayment::upsert_pending(db, &draft).await.unwrap();
        TherapistPayment::find_for_period(db, &t.id, "2026-03-16")
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_schedule_payment_records_actions() {
        let db = test_pool().await;
        let payment = pending_payment(&db, "2026-04-05").await;
        let recorder = Arc::new(RecordingScheduler::default());
        let notifier = PaymentNotifier::new(
            db.clone(),
            recorder.clone(),
            &SiteConfig::default(),
            &PaymentsConfig::default(),
        );

        let n = notifier
            .schedule_payment(&payment, at("2026-04-01T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(n, 4);

        let published = recorder.published.lock().unwrap().clone();
        assert_eq!(published[0].0, "http://localhost:8080/webhooks/payment-notifications");
        assert_eq!(published[0].1["payment_id"], payment.id.as_str());
        assert_eq!(published[0].1["stage"], "reminder");

        let actions = PaymentAction::list_for_payment(&db, &payment.id).await.unwrap();
        let scheduled = actions
            .iter()
            .filter(|a| a.action == payment_actions::NOTIFICATION_SCHEDULED)
            .count();
        assert_eq!(scheduled, 4);
    }

    #[tokio::test]
    async fn test_failed_stage_does_not_stop_the_rest() {
        let db = test_pool().await;
        let payment = pending_payment(&db, "2026-04-05").await;
        let recorder = Arc::new(RecordingScheduler {
            fail_stage: Some(NotificationStage::Deadline),
            ..Default::default()
        });
        let notifier = PaymentNotifier::new(
            db.clone(),
            recorder.clone(),
            &SiteConfig::default(),
            &PaymentsConfig::default(),
        );

        let n = notifier
            .schedule_payment(&payment, at("2026-04-01T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(recorder.published.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_disabled_scheduler_schedules_nothing() {
        let db = test_pool().await;
        let payment = pending_payment(&db, "2026-04-05").await;
        let notifier = PaymentNotifier::new(
            db.clone(),
            Arc::new(DisabledScheduler),
            &SiteConfig::default(),
            &PaymentsConfig::default(),
        );
        let n = notifier
            .schedule_payment(&payment, at("2026-04-01T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(n, 0);
    }
}
