//! Prometheus metrics endpoint and HTTP request tracking middleware.

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;

use crate::db::{PaymentStatus, TherapistPayment};
use crate::engine::NotificationStage;
use crate::AppState;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const CONTACT_REQUESTS_TOTAL: &str = "contact_requests_total";
pub const PAYMENT_NOTIFICATIONS_TOTAL: &str = "payment_notifications_total";
pub const THERAPISTS_ACTIVE: &str = "therapists_active";
pub const PAYMENTS_PENDING: &str = "payments_pending";
pub const PAYMENTS_OVERDUE: &str = "payments_overdue";

/// Install the Prometheus recorder. Call once at startup.
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    describe_counter!(
        HTTP_REQUESTS_TOTAL,
        "Total number of HTTP requests received"
    );
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(CONTACT_REQUESTS_TOTAL, "Contact requests submitted by visitors");
    describe_counter!(
        PAYMENT_NOTIFICATIONS_TOTAL,
        "Payment notification stages processed, by stage"
    );
    describe_gauge!(THERAPISTS_ACTIVE, "Therapists currently listed in the directory");
    describe_gauge!(PAYMENTS_PENDING, "Commission payments awaiting payment");
    describe_gauge!(PAYMENTS_OVERDUE, "Commission payments past their warning stage");

    Ok(handle)
}

/// GET /metrics
pub async fn metrics_endpoint(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_gauge_metrics(&state).await;

    match state.metrics_handle.as_ref() {
        Some(h) => (StatusCode::OK, h.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not initialized".to_string(),
        ),
    }
}

async fn update_gauge_metrics(state: &AppState) {
    if let Ok(count) =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM therapists WHERE status = 'active'")
            .fetch_one(&state.db)
            .await
    {
        gauge!(THERAPISTS_ACTIVE).set(count as f64);
    }

    if let Ok(count) = TherapistPayment::count_by_status(&state.db, PaymentStatus::Pending).await {
        gauge!(PAYMENTS_PENDING).set(count as f64);
    }
    if let Ok(count) = TherapistPayment::count_by_status(&state.db, PaymentStatus::Overdue).await {
        gauge!(PAYMENTS_OVERDUE).set(count as f64);
    }
}

/// Records `http_requests_total` and `http_request_duration_seconds`
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();

    // Use the route template so ids don't explode label cardinality
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

pub fn record_contact_request() {
    counter!(CONTACT_REQUESTS_TOTAL).increment(1);
}

pub fn record_payment_notification(stage: NotificationStage) {
    counter!(PAYMENT_NOTIFICATIONS_TOTAL, "stage" => stage.as_str()).increment(1);
}
