//! Transactional email over SMTP.
//!
//! When SMTP is not configured every send is skipped with a warning and
//! reported as not delivered, so callers never fail because of email.

use anyhow::Result;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use crate::config::{EmailConfig, SiteConfig};
use crate::db::{ContactRequest, Therapist, TherapistPayment};
use crate::engine::NotificationStage;

/// A rendered message ready to send
#[derive(Debug, Clone)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

pub struct EmailService {
    config: EmailConfig,
    site: SiteConfig,
    currency: String,
}

impl EmailService {
    pub fn new(config: EmailConfig, site: SiteConfig, currency: String) -> Self {
        Self {
            config,
            site,
            currency,
        }
    }

    /// Check if email sending is configured and enabled
    pub fn is_enabled(&self) -> bool {
        self.config.is_configured()
    }

    pub fn admin_address(&self) -> Option<&str> {
        self.config.admin_notification_address.as_deref()
    }

    /// New inquiry for a therapist
    pub async fn send_contact_request(
        &self,
        therapist: &Therapist,
        request: &ContactRequest,
    ) -> Result<bool> {
        let content = render_contact_request(&self.site, therapist, request);
        self.deliver(&therapist.email, &content).await
    }

    /// Acknowledgement to the visitor who sent the inquiry
    pub async fn send_contact_acknowledgement(
        &self,
        therapist: &Therapist,
        request: &ContactRequest,
    ) -> Result<bool> {
        let content = render_contact_acknowledgement(&self.site, therapist, request);
        self.deliver(&request.email, &content).await
    }

    pub async fn send_invitation(
        &self,
        to_email: &str,
        full_name: Option<&str>,
        accept_url: &str,
        expires_in_days: i64,
    ) -> Result<bool> {
        let content = render_invitation(&self.site, full_name, accept_url, expires_in_days);
        self.deliver(to_email, &content).await
    }

    /// Stage email for a commission payment
    pub async fn send_payment_notice(
        &self,
        to_email: &str,
        therapist: &Therapist,
        payment: &TherapistPayment,
        stage: NotificationStage,
    ) -> Result<bool> {
        let content = render_payment_notice(&self.site, &self.currency, therapist, payment, stage);
        self.deliver(to_email, &content).await
    }

    async fn deliver(&self, to_email: &str, content: &EmailContent) -> Result<bool> {
        if !self.is_enabled() {
            tracing::warn!(
                to = %to_email,
                subject = %content.subject,
                "Email not configured, skipping"
            );
            return Ok(false);
        }

        self.send_email(to_email, content).await?;
        Ok(true)
    }

    /// Send an email with HTML and plain text versions
    async fn send_email(&self, to_email: &str, content: &EmailContent) -> Result<()> {
        let smtp_host = self
            .config
            .smtp_host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SMTP host not configured"))?;
        let from_address = self
            .config
            .from_address
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("From address not configured"))?;

        let from: Mailbox = format!("{} <{}>", self.config.from_name, from_address).parse()?;
        let to: Mailbox = to_email.parse()?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(&content.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(content.text.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(content.html.clone()),
                    ),
            )?;

        let mailer = if self.config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
        }
        .port(self.config.smtp_port);

        let mailer = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            mailer.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            mailer
        };

        mailer.build().send(email).await?;

        tracing::info!(
            to = %to_email,
            subject = %content.subject,
            "Email sent successfully"
        );

        Ok(())
    }
}

/// Format a cent amount as `USD 12.50`
pub fn format_cents(cents: i64, currency: &str) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{} {}{}.{:02}", currency, sign, abs / 100, abs % 100)
}

/// Wrap body HTML in the shared layout
fn layout(site: &SiteConfig, title: &str, body_html: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>
        body {{ font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Arial, sans-serif; margin: 0; padding: 0; background-color: #f5f5f5; }}
        .container {{ max-width: 560px; margin: 0 auto; padding: 40px 20px; }}
        .card {{ background-color: #ffffff; border-radius: 8px; overflow: hidden; }}
        .header {{ background-color: #0f766e; color: white; padding: 28px 24px; text-align: center; }}
        .header h1 {{ margin: 0; font-size: 22px; font-weight: 600; }}
        .content {{ padding: 28px 24px; color: #374151; line-height: 1.6; }}
        .highlight {{ background-color: #f3f4f6; border-radius: 6px; padding: 16px; margin: 20px 0; }}
        .button {{ display: inline-block; background-color: #0f766e; color: white !important; text-decoration: none; padding: 12px 28px; border-radius: 6px; }}
        .footer {{ padding: 20px; text-align: center; color: #9ca3af; font-size: 12px; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="card">
            <div class="header"><h1>{title}</h1></div>
            <div class="content">{body_html}</div>
            <div class="footer"><a href="{base_url}">{site_name}</a></div>
        </div>
    </div>
</body>
</html>"#,
        title = html_escape(title),
        body_html = body_html,
        base_url = site.base_url,
        site_name = html_escape(&site.name),
    )
}

fn render_contact_request(
    site: &SiteConfig,
    therapist: &Therapist,
    request: &ContactRequest,
) -> EmailContent {
    let subject = format!("New contact request from {}", request.full_name);
    let phone = request.phone.as_deref().unwrap_or("-");
    let modality = request.preferred_modality.as_deref().unwrap_or("no preference");
    let dashboard = site.url("/dashboard/contact-requests");

    let html = layout(
        site,
        "New contact request",
        &format!(
            r#"<p>Hi {therapist},</p>
<p><strong>{name}</strong> would like to get in touch with you.</p>
<div class="highlight">
<p>Email: {email}<br>Phone: {phone}<br>Preferred modality: {modality}</p>
<p>{message}</p>
</div>
<p><a class="button" href="{dashboard}">Open your dashboard</a></p>"#,
            therapist = html_escape(&therapist.full_name),
            name = html_escape(&request.full_name),
            email = html_escape(&request.email),
            phone = html_escape(phone),
            modality = html_escape(modality),
            message = html_escape(&request.message),
            dashboard = dashboard,
        ),
    );

    let text = format!(
        "Hi {},\n\n{} would like to get in touch with you.\n\nEmail: {}\nPhone: {}\nPreferred modality: {}\n\n{}\n\nOpen your dashboard: {}\n",
        therapist.full_name, request.full_name, request.email, phone, modality, request.message, dashboard
    );

    EmailContent { subject, html, text }
}

fn render_contact_acknowledgement(
    site: &SiteConfig,
    therapist: &Therapist,
    request: &ContactRequest,
) -> EmailContent {
    let subject = format!("Your message to {} was delivered", therapist.full_name);
    let html = layout(
        site,
        "Message delivered",
        &format!(
            "<p>Hi {name},</p><p>We passed your message on to <strong>{therapist}</strong>. They will reply to you directly.</p>",
            name = html_escape(&request.full_name),
            therapist = html_escape(&therapist.full_name),
        ),
    );
    let text = format!(
        "Hi {},\n\nWe passed your message on to {}. They will reply to you directly.\n\n{}\n",
        request.full_name, therapist.full_name, site.name
    );
    EmailContent { subject, html, text }
}

fn render_invitation(
    site: &SiteConfig,
    full_name: Option<&str>,
    accept_url: &str,
    expires_in_days: i64,
) -> EmailContent {
    let greeting = full_name.unwrap_or("there");
    let subject = format!("You're invited to join {}", site.name);
    let html = layout(
        site,
        "You're invited",
        &format!(
            r#"<p>Hi {greeting},</p>
<p>You have been invited to list your practice on <strong>{site_name}</strong>.</p>
<p><a class="button" href="{accept_url}">Create your account</a></p>
<p>This invitation will expire in {expires_in_days} days.</p>"#,
            greeting = html_escape(greeting),
            site_name = html_escape(&site.name),
            accept_url = accept_url,
            expires_in_days = expires_in_days,
        ),
    );
    let text = format!(
        "Hi {},\n\nYou have been invited to list your practice on {}.\n\nCreate your account:\n{}\n\nThis invitation will expire in {} days.\n",
        greeting, site.name, accept_url, expires_in_days
    );
    EmailContent { subject, html, text }
}

fn render_payment_notice(
    site: &SiteConfig,
    currency: &str,
    therapist: &Therapist,
    payment: &TherapistPayment,
    stage: NotificationStage,
) -> EmailContent {
    let amount = format_cents(payment.amount_due_cents, currency);
    let period = format!("{} to {}", payment.period_start, payment.period_end);

    let (subject, headline) = match stage {
        NotificationStage::Reminder => (
            format!("Commission of {} due on {}", amount, payment.due_date),
            format!(
                "Your commission for {} is due on {}.",
                period, payment.due_date
            ),
        ),
        NotificationStage::Deadline => (
            format!("Commission of {} is due today", amount),
            format!("Your commission for {} is due today.", period),
        ),
        NotificationStage::Warning => (
            format!("Overdue: commission of {}", amount),
            format!(
                "Your commission for {} is overdue. Your profile will be suspended if it stays unpaid.",
                period
            ),
        ),
        NotificationStage::Suspension => (
            "Your profile has been suspended".to_string(),
            format!(
                "Your profile was suspended because the commission for {} is still unpaid. It is restored once the payment is recorded.",
                period
            ),
        ),
    };
    let payments_url = site.url("/dashboard/payments");

    let html = layout(
        site,
        &subject,
        &format!(
            r#"<p>Hi {name},</p>
<p>{headline}</p>
<div class="highlight"><p>Sessions: {sessions}<br>Amount due: {amount}<br>Due date: {due}</p></div>
<p><a class="button" href="{payments_url}">View payments</a></p>"#,
            name = html_escape(&therapist.full_name),
            headline = html_escape(&headline),
            sessions = payment.session_count,
            amount = html_escape(&amount),
            due = html_escape(&payment.due_date),
            payments_url = payments_url,
        ),
    );
    let text = format!(
        "Hi {},\n\n{}\n\nSessions: {}\nAmount due: {}\nDue date: {}\n\nView payments: {}\n",
        therapist.full_name, headline, payment.session_count, amount, payment.due_date, payments_url
    );

    EmailContent { subject, html, text }
}

/// Escape HTML special characters
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn therapist() -> Therapist {
        Therapist {
            id: "t1".into(),
            profile_id: None,
            slug: "lena-ortiz".into(),
            full_name: "Lena Ortiz".into(),
            email: "lena@example.com".into(),
            phone: None,
            bio: None,
            city: None,
            modality: "online".into(),
            specialties: "[]".into(),
            languages: "[]".into(),
            price_per_session_cents: None,
            commission_rate_cents: None,
            status: "active".into(),
            is_verified: false,
            photo_url: None,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn payment() -> TherapistPayment {
        TherapistPayment {
            id: "p1".into(),
            therapist_id: "t1".into(),
            period_start: "2026-03-01".into(),
            period_end: "2026-03-15".into(),
            session_count: 4,
            rate_cents: 1250,
            amount_due_cents: 5000,
            due_date: "2026-03-20".into(),
            status: "pending".into(),
            payment_reference: None,
            paid_at: None,
            created_at: "2026-03-16T06:00:00Z".into(),
            updated_at: "2026-03-16T06:00:00Z".into(),
        }
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("Tom & Jerry"), "Tom &amp; Jerry");
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(5000, "USD"), "USD 50.00");
        assert_eq!(format_cents(1205, "EUR"), "EUR 12.05");
        assert_eq!(format_cents(-99, "USD"), "USD -0.99");
    }

    #[test]
    fn test_payment_notice_per_stage() {
        let site = SiteConfig::default();
        let reminder = render_payment_notice(&site, "USD", &therapist(), &payment(), NotificationStage::Reminder);
        assert!(reminder.subject.contains("USD 50.00"));
        assert!(reminder.text.contains("2026-03-20"));
        assert!(reminder.html.contains("http://localhost:8080/dashboard/payments"));

        let suspension = render_payment_notice(&site, "USD", &therapist(), &payment(), NotificationStage::Suspension);
        assert_eq!(suspension.subject, "Your profile has been suspended");
    }

    #[test]
    fn test_contact_request_escapes_visitor_input() {
        let request = ContactRequest {
            id: "c1".into(),
            therapist_id: "t1".into(),
            full_name: "<b>Eve</b>".into(),
            email: "eve@example.com".into(),
            phone: None,
            message: "Hello & thanks".into(),
            preferred_modality: None,
            status: "new".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        };
        let content = render_contact_request(&SiteConfig::default(), &therapist(), &request);
        assert!(content.html.contains("&lt;b&gt;Eve&lt;/b&gt;"));
        assert!(content.html.contains("Hello &amp; thanks"));
        assert!(content.text.contains("Phone: -"));
    }

    #[tokio::test]
    async fn test_unconfigured_service_skips() {
        let service = EmailService::new(EmailConfig::default(), SiteConfig::default(), "USD".into());
        assert!(!service.is_enabled());
        let sent = service
            .send_invitation("new@example.com", None, "http://localhost/accept", 7)
            .await
            .unwrap();
        assert!(!sent);
    }
}
