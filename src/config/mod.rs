use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL. When unset, a SQLite file inside `server.data_dir` is used.
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

impl DatabaseConfig {
    pub fn resolved_url(&self, data_dir: &Path) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "sqlite:{}?mode=rwc",
                data_dir.join("therapydesk.db").display()
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_admin_token")]
    pub admin_token: String,
    /// Bootstrap admin account, created on startup if missing
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
    #[serde(default = "default_invitation_ttl_days")]
    pub invitation_ttl_days: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_token: default_admin_token(),
            admin_email: None,
            admin_password: None,
            session_ttl_days: default_session_ttl_days(),
            invitation_ttl_days: default_invitation_ttl_days(),
        }
    }
}

fn default_admin_token() -> String {
    // Generate a random token if not provided
    uuid::Uuid::new_v4().to_string()
}

fn default_session_ttl_days() -> i64 {
    7
}

fn default_invitation_ttl_days() -> i64 {
    7
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Public base URL, used for links in emails and webhook destinations
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_site_name")]
    pub name: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            name: default_site_name(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_site_name() -> String {
    "TherapyDesk".to_string()
}

impl SiteConfig {
    /// Join a path onto the base URL without doubling slashes
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_true")]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_site_name")]
    pub from_name: String,
    /// Copy of payment escalations goes here when set
    pub admin_notification_address: Option<String>,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: true,
            from_address: None,
            from_name: default_site_name(),
            admin_notification_address: None,
        }
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

/// Scheduled-message provider (QStash-compatible HTTP API)
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_url")]
    pub base_url: String,
    pub token: Option<String>,
    pub current_signing_key: Option<String>,
    pub next_signing_key: Option<String>,
    /// Require the signature `sub` claim to match our webhook URL
    #[serde(default = "default_true")]
    pub verify_destination: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_url: default_scheduler_url(),
            token: None,
            current_signing_key: None,
            next_signing_key: None,
            verify_destination: true,
        }
    }
}

fn default_scheduler_url() -> String {
    "https://qstash.upstash.io".to_string()
}

impl SchedulerConfig {
    pub fn signing_keys(&self) -> Vec<&str> {
        [&self.current_signing_key, &self.next_signing_key]
            .into_iter()
            .filter_map(|k| k.as_deref())
            .filter(|k| !k.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentsConfig {
    /// Flat commission per completed session, in cents
    #[serde(default = "default_commission_cents")]
    pub default_commission_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Days after a period ends before payment is due
    #[serde(default = "default_grace_days")]
    pub grace_days: i64,
    #[serde(default = "default_notification_hour")]
    pub notification_hour_utc: u32,
    #[serde(default = "default_true")]
    pub cycle_enabled: bool,
    /// Six-field cron expression (sec min hour day month weekday)
    #[serde(default = "default_cycle_cron")]
    pub cycle_cron: String,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            default_commission_cents: default_commission_cents(),
            currency: default_currency(),
            grace_days: default_grace_days(),
            notification_hour_utc: default_notification_hour(),
            cycle_enabled: true,
            cycle_cron: default_cycle_cron(),
        }
    }
}

fn default_commission_cents() -> i64 {
    1000
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_grace_days() -> i64 {
    5
}

fn default_notification_hour() -> u32 {
    9
}

fn default_cycle_cron() -> String {
    "0 0 6 1,16 * *".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_api_limit")]
    pub api_requests_per_window: u32,
    #[serde(default = "default_auth_limit")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_contact_limit")]
    pub contact_requests_per_window: u32,
    #[serde(default = "default_webhook_limit")]
    pub webhook_requests_per_window: u32,
    /// Sweep expired windows every N checks
    #[serde(default = "default_sweep_every")]
    pub sweep_every: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: default_window_seconds(),
            api_requests_per_window: default_api_limit(),
            auth_requests_per_window: default_auth_limit(),
            contact_requests_per_window: default_contact_limit(),
            webhook_requests_per_window: default_webhook_limit(),
            sweep_every: default_sweep_every(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_window_seconds() -> u64 {
    60
}

fn default_api_limit() -> u32 {
    120
}

fn default_auth_limit() -> u32 {
    10
}

fn default_contact_limit() -> u32 {
    5
}

fn default_webhook_limit() -> u32 {
    300
}

fn default_sweep_every() -> u64 {
    500
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Override secrets and endpoints from the environment.
    ///
    /// Takes a lookup function so tests don't have to touch the process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut Option<String>, key: &str| {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *target = Some(value);
            }
        };

        set(&mut self.database.url, "THERAPYDESK_DATABASE_URL");
        set(&mut self.email.smtp_host, "SMTP_HOST");
        set(&mut self.email.smtp_username, "SMTP_USERNAME");
        set(&mut self.email.smtp_password, "SMTP_PASSWORD");
        set(&mut self.scheduler.token, "QSTASH_TOKEN");
        set(&mut self.scheduler.current_signing_key, "QSTASH_CURRENT_SIGNING_KEY");
        set(&mut self.scheduler.next_signing_key, "QSTASH_NEXT_SIGNING_KEY");

        if let Some(token) = lookup("THERAPYDESK_ADMIN_TOKEN").filter(|v| !v.is_empty()) {
            self.auth.admin_token = token;
        }
        if let Some(url) = lookup("THERAPYDESK_SITE_URL").filter(|v| !v.is_empty()) {
            self.site.base_url = url;
        }
        if let Some(url) = lookup("QSTASH_URL").filter(|v| !v.is_empty()) {
            self.scheduler.base_url = url;
        }
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            site: SiteConfig::default(),
            email: EmailConfig::default(),
            scheduler: SchedulerConfig::default(),
            payments: PaymentsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.payments.default_commission_cents, 1000);
        assert_eq!(config.payments.grace_days, 5);
        assert_eq!(config.auth.invitation_ttl_days, 7);
        assert!(config.rate_limit.enabled);
        assert!(!config.email.is_configured());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml(
            r#"
[payments]
default_commission_cents = 2500
currency = "EUR"

[site]
base_url = "https://example.org/"
"#,
        )
        .unwrap();
        assert_eq!(config.payments.default_commission_cents, 2500);
        assert_eq!(config.payments.currency, "EUR");
        assert_eq!(config.payments.notification_hour_utc, 9);
        assert_eq!(
            config.site.url("/webhooks/payment-notifications"),
            "https://example.org/webhooks/payment-notifications"
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("QSTASH_TOKEN", "tok"),
            ("QSTASH_CURRENT_SIGNING_KEY", "current"),
            ("QSTASH_NEXT_SIGNING_KEY", ""),
            ("THERAPYDESK_SITE_URL", "https://therapy.example"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.scheduler.token.as_deref(), Some("tok"));
        assert_eq!(config.scheduler.signing_keys(), vec!["current"]);
        assert_eq!(config.site.base_url, "https://therapy.example");
    }

    #[test]
    fn test_database_url_fallback() {
        let db = DatabaseConfig::default();
        let url = db.resolved_url(Path::new("/var/lib/td"));
        assert_eq!(url, "sqlite:/var/lib/td/therapydesk.db?mode=rwc");
    }
}
