pub mod audit;
pub mod auth;
mod contact;
pub mod error;
mod invitations;
pub mod metrics;
mod patients;
mod payments;
pub mod rate_limit;
mod sessions;
mod site_content;
mod therapists;
mod validation;
pub mod webhooks;

use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::db::Paginated;
use crate::engine::WEBHOOK_PATH;
use crate::AppState;

/// Flatten a page into the `{ok, items, total, ...}` list envelope
pub(crate) fn page_body<T: Serialize>(page: Paginated<T>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "items": page.items,
        "total": page.total,
        "page": page.page,
        "per_page": page.per_page,
        "total_pages": page.total_pages,
    }))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    // Public directory and account routes
    let public_routes = Router::new()
        .route("/therapists", get(therapists::search_therapists))
        .route("/therapists/:slug", get(therapists::get_public_profile))
        .route("/site-content/:key", get(site_content::get_site_content))
        .route("/invitations/:token", get(invitations::get_invitation))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let contact_routes = Router::new()
        .route("/contact", post(contact::create_contact_request))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_contact,
        ));

    // Credential-bearing routes get the strict tier
    let auth_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/invitations/accept", post(invitations::accept_invitation))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Therapist self-service
    let me_routes = Router::new()
        .route(
            "/profile",
            get(therapists::get_own_profile).put(therapists::update_own_profile),
        )
        .route("/contact-requests", get(contact::list_contact_requests))
        .route(
            "/contact-requests/:id",
            patch(contact::update_contact_request_status),
        )
        .route(
            "/patients",
            get(patients::list_patients).post(patients::create_patient),
        )
        .route(
            "/patients/:id",
            get(patients::get_patient)
                .put(patients::update_patient)
                .delete(patients::delete_patient),
        )
        .route(
            "/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route("/sessions/:id", put(sessions::update_session))
        .route("/sessions/:id/cancel", post(sessions::cancel_session))
        .route("/payments", get(payments::list_own_payments))
        .route("/payments/:id/submit", post(payments::submit_payment))
        .route("/metrics", get(payments::own_metrics))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let admin_routes = Router::new()
        // Therapists
        .route(
            "/therapists",
            get(therapists::list_therapists).post(therapists::create_therapist),
        )
        .route(
            "/therapists/:id",
            get(therapists::get_therapist)
                .put(therapists::update_therapist)
                .delete(therapists::delete_therapist),
        )
        .route("/therapists/:id/status", post(therapists::set_therapist_status))
        // Payments
        .route("/payments", get(payments::list_payments))
        .route("/payments/calculate", post(payments::calculate_payments))
        .route("/payments/:id/mark-paid", post(payments::mark_paid))
        .route("/payments/:id/waive", post(payments::waive_payment))
        .route("/payments/:id/actions", get(payments::list_payment_actions))
        // Invitations
        .route(
            "/invitations",
            get(invitations::list_invitations).post(invitations::create_invitation),
        )
        .route("/invitations/bulk", post(invitations::bulk_create_invitations))
        .route("/invitations/:id", delete(invitations::revoke_invitation))
        .route("/invitations/:id/resend", post(invitations::resend_invitation))
        // Audit and site copy
        .route("/audit-logs", get(audit::list_logs))
        .route("/site-content/:key", put(site_content::update_site_content))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let webhook_routes = Router::new()
        .route(WEBHOOK_PATH, post(webhooks::payment_notification_webhook))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_webhook,
        ));

    let api_routes = public_routes
        .merge(contact_routes)
        .merge(auth_routes)
        .nest("/me", me_routes)
        .nest("/admin", admin_routes);

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/api", api_routes)
        .merge(webhook_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "ok": true }))
}


#[cfg(test)]
mod tests {
    use super::test_support::{send, state_with_config, test_config, test_state};
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::create_router;

    #[tokio::test]
    async fn test_health() {
        let state = test_state().await;
        let (status, body) = send(&state, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_contact_tier_is_rate_limited() {
        let mut config = test_config();
        config.rate_limit.enabled = true;
        config.rate_limit.contact_requests_per_window = 2;
        let state = state_with_config(config).await;

        for _ in 0..2 {
            let (status, _) = send(&state, Method::POST, "/api/contact", None, Some(serde_json::json!({}))).await;
            assert_ne!(status, StatusCode::TOO_MANY_REQUESTS);
        }

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/contact")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("Retry-After"));

        // Other tiers keep their own budget
        let (status, _) = send(&state, Method::GET, "/api/therapists", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let state = test_state().await;
        let (status, _) = send(&state, Method::GET, "/api/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
