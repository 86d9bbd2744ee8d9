pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod notifications;

pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::engine::{scheduler_from_config, MessageScheduler, PaymentNotifier};
use crate::notifications::EmailService;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub rate_limiter: Arc<RateLimiter>,
    pub email: Arc<EmailService>,
    pub scheduler: Arc<dyn MessageScheduler>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let email = Arc::new(EmailService::new(
            config.email.clone(),
            config.site.clone(),
            config.payments.currency.clone(),
        ));
        let scheduler = scheduler_from_config(&config.scheduler);
        Self {
            config,
            db,
            rate_limiter,
            email,
            scheduler,
            metrics_handle: None,
        }
    }

    /// Replace the message scheduler
    pub fn with_scheduler(mut self, scheduler: Arc<dyn MessageScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn notifier(&self) -> PaymentNotifier {
        PaymentNotifier::new(
            self.db.clone(),
            self.scheduler.clone(),
            &self.config.site,
            &self.config.payments,
        )
    }
}
