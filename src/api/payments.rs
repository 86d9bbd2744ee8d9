//! Commission payments: the therapist's view and the admin ledger.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::db::{
    actions, payment_actions, resource_types, CalculatePaymentsRequest, MetricsRangeQuery,
    PaymentAction, PaymentListQuery, PaymentStatus, SubmitPaymentRequest, Therapist,
    TherapistMetrics, TherapistPayment, TherapistStatus,
};
use crate::engine::PaymentCycle;
use crate::AppState;

use super::audit::audit_log;
use super::auth::{AdminUser, TherapistUser};
use super::error::ApiError;

const MAX_REFERENCE_LEN: usize = 200;

fn clean_reference(reference: Option<&str>) -> Result<Option<String>, ApiError> {
    match reference.map(str::trim).filter(|r| !r.is_empty()) {
        Some(r) if r.chars().count() > MAX_REFERENCE_LEN => Err(ApiError::validation_field(
            "reference",
            format!("Reference is too long (max {} characters)", MAX_REFERENCE_LEN),
        )),
        other => Ok(other.map(str::to_string)),
    }
}

/// Parse an optional JSON body. An empty body yields the default, a malformed one is a 400.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid request body: {}", e)))
}

async fn load_payment(state: &AppState, id: &str) -> Result<(TherapistPayment, PaymentStatus), ApiError> {
    let payment = TherapistPayment::find_by_id(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Payment not found"))?;
    let status = payment
        .status_enum()
        .ok_or_else(|| ApiError::internal("Payment has an unknown status"))?;
    Ok((payment, status))
}

/// GET /api/me/payments
pub async fn list_own_payments(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
) -> Result<Json<Value>, ApiError> {
    let items = TherapistPayment::list_for_therapist(&state.db, &caller.therapist.id).await?;
    Ok(Json(json!({ "ok": true, "items": items })))
}

/// POST /api/me/payments/:id/submit
pub async fn submit_payment(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Path(id): Path<String>,
    Json(req): Json<SubmitPaymentRequest>,
) -> Result<Json<Value>, ApiError> {
    let reference = clean_reference(req.reference.as_deref())?;
    let (payment, status) = load_payment(&state, &id).await?;
    if payment.therapist_id != caller.therapist.id {
        return Err(ApiError::not_found("Payment not found"));
    }
    if !matches!(status, PaymentStatus::Pending | PaymentStatus::Overdue) {
        return Err(ApiError::conflict(format!(
            "Payment is {} and cannot be submitted",
            status
        )));
    }

    let mut tx = state.db.begin().await?;
    TherapistPayment::set_status(&mut *tx, &id, PaymentStatus::Submitted, reference.as_deref())
        .await?;
    PaymentAction::record(
        &mut *tx,
        &id,
        payment_actions::MARKED_SUBMITTED,
        Some(&caller.user.id),
        Some(json!({ "reference": reference, "previous_status": status })),
    )
    .await?;
    tx.commit().await?;

    tracing::info!(payment_id = %id, therapist_id = %caller.therapist.id, "Payment submitted");

    let (payment, _) = load_payment(&state, &id).await?;
    Ok(Json(json!({ "ok": true, "payment": payment })))
}

/// GET /api/me/metrics
pub async fn own_metrics(
    State(state): State<Arc<AppState>>,
    caller: TherapistUser,
    Query(range): Query<MetricsRangeQuery>,
) -> Result<Json<Value>, ApiError> {
    for (field, value) in [("from", &range.from), ("to", &range.to)] {
        if let Some(v) = value {
            if NaiveDate::parse_from_str(v, "%Y-%m-%d").is_err() {
                return Err(ApiError::validation_field(field, "Must be a YYYY-MM-DD date"));
            }
        }
    }

    let summary = TherapistMetrics::list_for_therapist(&state.db, &caller.therapist.id, &range).await?;
    Ok(Json(json!({ "ok": true, "metrics": summary })))
}

/// GET /api/admin/payments
pub async fn list_payments(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<PaymentListQuery>,
) -> Result<Json<Value>, ApiError> {
    if let Some(status) = &query.status {
        if PaymentStatus::from_str(status).is_none() {
            return Err(ApiError::validation_field(
                "status",
                "Status must be one of: pending, submitted, paid, overdue, waived",
            ));
        }
    }
    let items = TherapistPayment::list(&state.db, &query).await?;
    Ok(Json(json!({ "ok": true, "items": items })))
}

/// POST /api/admin/payments/calculate
pub async fn calculate_payments(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let req: CalculatePaymentsRequest = optional_body(&body)?;
    let date = match req.date.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .map_err(|_| ApiError::validation_field("date", "Must be a YYYY-MM-DD date"))?,
        None => Utc::now().date_naive(),
    };

    let cycle = PaymentCycle::new(state.db.clone(), &state.config.payments, state.notifier());
    let report = cycle.run_for_date(date).await?;

    tracing::info!(
        period_start = %report.commission.period_start,
        payments_upserted = report.commission.payments_upserted,
        notifications_scheduled = report.notifications_scheduled,
        "Commission calculation requested"
    );

    audit_log(
        &state,
        &admin,
        &headers,
        actions::PAYMENTS_CALCULATE,
        resource_types::PAYMENT,
        None,
        Some(json!({
            "date": date.to_string(),
            "period_start": report.commission.period_start,
            "payments_upserted": report.commission.payments_upserted,
        })),
    )
    .await;

    let mut body = serde_json::to_value(&report)
        .map_err(|e| ApiError::internal(format!("Failed to encode report: {}", e)))?;
    body["ok"] = json!(true);
    Ok(Json(body))
}

/// POST /api/admin/payments/:id/mark-paid
pub async fn mark_paid(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let req: SubmitPaymentRequest = optional_body(&body)?;
    let reference = clean_reference(req.reference.as_deref())?;
    let (payment, status) = load_payment(&state, &id).await?;
    if status.is_settled() {
        return Err(ApiError::conflict(format!("Payment is already {}", status)));
    }

    let therapist = Therapist::find_by_id(&state.db, &payment.therapist_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Therapist not found"))?;
    let reactivate = therapist.status_enum() == Some(TherapistStatus::Suspended)
        && TherapistPayment::count_unpaid_for_therapist(&state.db, &therapist.id, &id).await? == 0;

    let mut tx = state.db.begin().await?;
    TherapistPayment::set_status(&mut *tx, &id, PaymentStatus::Paid, reference.as_deref()).await?;
    PaymentAction::record(
        &mut *tx,
        &id,
        payment_actions::MARKED_PAID,
        Some(&admin.0.id),
        Some(json!({ "reference": reference, "previous_status": status })),
    )
    .await?;
    if reactivate {
        Therapist::set_status(&mut *tx, &therapist.id, TherapistStatus::Active).await?;
        PaymentAction::record(
            &mut *tx,
            &id,
            payment_actions::THERAPIST_REACTIVATED,
            Some(&admin.0.id),
            None,
        )
        .await?;
    }
    tx.commit().await?;

    tracing::info!(payment_id = %id, therapist_id = %therapist.id, reactivated = reactivate, "Payment marked paid");

    audit_log(
        &state,
        &admin,
        &headers,
        actions::PAYMENT_MARK_PAID,
        resource_types::PAYMENT,
        Some(&id),
        Some(json!({ "reference": reference, "therapist_reactivated": reactivate })),
    )
    .await;

    let (payment, _) = load_payment(&state, &id).await?;
    Ok(Json(json!({
        "ok": true,
        "payment": payment,
        "therapist_reactivated": reactivate,
    })))
}

/// POST /api/admin/payments/:id/waive
pub async fn waive_payment(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let (_, status) = load_payment(&state, &id).await?;
    if status.is_settled() {
        return Err(ApiError::conflict(format!("Payment is already {}", status)));
    }

    let mut tx = state.db.begin().await?;
    TherapistPayment::set_status(&mut *tx, &id, PaymentStatus::Waived, None).await?;
    PaymentAction::record(
        &mut *tx,
        &id,
        payment_actions::WAIVED,
        Some(&admin.0.id),
        Some(json!({ "previous_status": status })),
    )
    .await?;
    tx.commit().await?;

    audit_log(
        &state,
        &admin,
        &headers,
        actions::PAYMENT_WAIVE,
        resource_types::PAYMENT,
        Some(&id),
        None,
    )
    .await;

    let (payment, _) = load_payment(&state, &id).await?;
    Ok(Json(json!({ "ok": true, "payment": payment })))
}

/// GET /api/admin/payments/:id/actions
pub async fn list_payment_actions(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    load_payment(&state, &id).await?;
    let items: Vec<Value> = PaymentAction::list_for_payment(&state.db, &id)
        .await?
        .into_iter()
        .map(|a| {
            let details = a
                .details
                .as_deref()
                .and_then(|d| serde_json::from_str::<Value>(d).ok());
            json!({
                "id": a.id,
                "action": a.action,
                "actor_id": a.actor_id,
                "details": details,
                "created_at": a.created_at,
            })
        })
        .collect();
    Ok(Json(json!({ "ok": true, "items": items })))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::api::test_support::{send, test_state, therapist_login, ADMIN_TOKEN};
    use crate::db::{PaymentDraft, PaymentStatus, Therapist, TherapistPayment, TherapistStatus};
    use crate::DbPool;

    async fn seed_payment(db: &DbPool, therapist_id: &str, period_start: &str) -> TherapistPayment {
        TherapistPayment::upsert_pending(
            db,
            &PaymentDraft {
                therapist_id: therapist_id.to_string(),
                period_start: period_start.to_string(),
                period_end: period_start.to_string(),
                session_count: 3,
                rate_cents: 1000,
                amount_due_cents: 3000,
                due_date: "2026-01-20".to_string(),
            },
        )
        .await
        .unwrap();
        TherapistPayment::find_for_period(db, therapist_id, period_start)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_therapist_submits_own_payment_once() {
        let state = test_state().await;
        let (token, therapist) = therapist_login(&state, "Sia Submit").await;
        let (other_token, _) = therapist_login(&state, "Ned Nosy").await;
        let payment = seed_payment(&state.db, &therapist.id, "2026-01-01").await;
        let path = format!("/api/me/payments/{}/submit", payment.id);

        let (status, _) = send(&state, Method::POST, &path, Some(&other_token), Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &state,
            Method::POST,
            &path,
            Some(&token),
            Some(json!({ "reference": "TRX-991" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payment"]["status"], "submitted");
        assert_eq!(body["payment"]["payment_reference"], "TRX-991");

        let (status, _) = send(&state, Method::POST, &path, Some(&token), Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(&state, Method::GET, "/api/me/payments", Some(&token), None).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_paid_reactivates_when_nothing_else_overdue() {
        let state = test_state().await;
        let (_, therapist) = therapist_login(&state, "Rex Reactivate").await;
        let first = seed_payment(&state.db, &therapist.id, "2026-01-01").await;
        let second = seed_payment(&state.db, &therapist.id, "2026-02-01").await;
        for id in [&first.id, &second.id] {
            TherapistPayment::set_status(&state.db, id, PaymentStatus::Overdue, None)
                .await
                .unwrap();
        }
        Therapist::set_status(&state.db, &therapist.id, TherapistStatus::Suspended)
            .await
            .unwrap();

        let (status, body) = send(
            &state,
            Method::POST,
            &format!("/api/admin/payments/{}/mark-paid", first.id),
            Some(ADMIN_TOKEN),
            Some(json!({ "reference": "bank-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payment"]["status"], "paid");
        assert!(body["payment"]["paid_at"].is_string());
        assert_eq!(body["therapist_reactivated"], false);

        let (status, body) = send(
            &state,
            Method::POST,
            &format!("/api/admin/payments/{}/mark-paid", second.id),
            Some(ADMIN_TOKEN),
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["therapist_reactivated"], true);

        let t = Therapist::find_by_id(&state.db, &therapist.id).await.unwrap().unwrap();
        assert!(t.is_active());

        let (status, body) = send(
            &state,
            Method::GET,
            &format!("/api/admin/payments/{}/actions", second.id),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let actions: Vec<&str> = body["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["action"].as_str().unwrap())
            .collect();
        assert!(actions.contains(&"marked_paid"));
        assert!(actions.contains(&"therapist_reactivated"));

        let (status, _) = send(
            &state,
            Method::POST,
            &format!("/api/admin/payments/{}/waive", second.id),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_mark_paid_keeps_suspension_while_another_payment_is_pending() {
        let state = test_state().await;
        let (_, therapist) = therapist_login(&state, "Pia Pending").await;
        let overdue = seed_payment(&state.db, &therapist.id, "2026-01-01").await;
        let pending = seed_payment(&state.db, &therapist.id, "2026-01-16").await;
        TherapistPayment::set_status(&state.db, &overdue.id, PaymentStatus::Overdue, None)
            .await
            .unwrap();
        Therapist::set_status(&state.db, &therapist.id, TherapistStatus::Suspended)
            .await
            .unwrap();

        let (status, body) = send(
            &state,
            Method::POST,
            &format!("/api/admin/payments/{}/mark-paid", overdue.id),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["therapist_reactivated"], false);

        let t = Therapist::find_by_id(&state.db, &therapist.id).await.unwrap().unwrap();
        assert_eq!(t.status_enum(), Some(TherapistStatus::Suspended));
        let other = TherapistPayment::find_by_id(&state.db, &pending.id).await.unwrap().unwrap();
        assert_eq!(other.status_enum(), Some(PaymentStatus::Pending));
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_rejected() {
        let state = test_state().await;
        let (_, therapist) = therapist_login(&state, "Mo Malformed").await;
        let payment = seed_payment(&state.db, &therapist.id, "2026-01-01").await;

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/admin/payments/calculate",
            Some(ADMIN_TOKEN),
            Some(json!({ "date": 5 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "bad_request");

        let (status, _) = send(
            &state,
            Method::POST,
            &format!("/api/admin/payments/{}/mark-paid", payment.id),
            Some(ADMIN_TOKEN),
            Some(json!({ "reference": ["not", "a", "string"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let stored = TherapistPayment::find_by_id(&state.db, &payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status_enum(), Some(PaymentStatus::Pending));

        let (status, body) = send(
            &state,
            Method::POST,
            &format!("/api/admin/payments/{}/mark-paid", payment.id),
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_calculate_closes_previous_period_and_schedules() {
        let state = test_state().await;
        let (_, therapist) = therapist_login(&state, "Cleo Calc").await;
        for day in ["2026-03-02T10:00:00Z", "2026-03-09T10:00:00Z"] {
            sqlx::query(
                "INSERT INTO sessions (id, therapist_id, scheduled_at, duration_minutes, status, created_at, updated_at) VALUES (?, ?, ?, 50, 'completed', ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&therapist.id)
            .bind(day)
            .bind(day)
            .bind(day)
            .execute(&state.db)
            .await
            .unwrap();
        }

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/admin/payments/calculate",
            Some(ADMIN_TOKEN),
            Some(json!({ "date": "2026-03-20" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["period_start"], "2026-03-01");
        assert_eq!(body["period_end"], "2026-03-15");
        assert_eq!(body["payments_upserted"], 1);

        let payment = TherapistPayment::find_for_period(&state.db, &therapist.id, "2026-03-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.amount_due_cents, 2000);

        let (status, body) = send(
            &state,
            Method::POST,
            "/api/admin/payments/calculate",
            Some(ADMIN_TOKEN),
            Some(json!({ "date": "March 20" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["details"]["date"].is_array());

        let (_, body) = send(
            &state,
            Method::GET,
            "/api/admin/payments?status=pending",
            Some(ADMIN_TOKEN),
            None,
        )
        .await;
        assert_eq!(body["items"].as_array().unwrap().len(), 1);
    }
}
