//! Per-environment configuration.
//!
//! A [`Settings`] value is built once at process start and shared read-only
//! (wrapped in an `Arc`) by every component. Library code never reads the
//! process environment itself.

use std::sync::Arc;

/// SMTP connection parameters.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Upgrade the connection with STARTTLS after connecting.
    pub starttls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// SFTP endpoint for PubMed-style deposits.
#[derive(Debug, Clone)]
pub struct SftpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Remote working directory uploads land in.
    pub cwd: String,
}

/// Frozen per-environment configuration record.
///
/// Field groups follow the deployment surface: identity, storage, queues,
/// outbound endpoints, mail, and scheduling.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Environment name, e.g. `dev` or `live`.
    pub environment: String,
    /// Domain identifier included in admin email subjects and logs.
    pub domain: String,
    /// Storage provider scheme for object addresses, e.g. `s3`.
    pub storage_provider: String,
    pub region: String,
    /// Task list deciders and workers poll by default.
    pub default_task_list: String,

    // Buckets
    /// Bucket holding the per-pipeline outbox/published prefixes.
    pub publishing_bucket: String,
    /// Bucket holding article XML keyed by expanded folder.
    pub articles_bucket: String,
    /// Bucket holding digest source documents and images.
    pub digests_bucket: String,

    // Queues
    pub s3_notification_queue: String,
    pub workflow_starter_queue: String,
    pub monitor_queue: String,

    // Outbound endpoints
    pub crossref_url: String,
    pub crossref_login_id: String,
    pub crossref_login_passwd: String,
    /// Article-versions service URL template; `{article_id}` is substituted.
    pub lax_article_versions_url: String,
    pub digest_endpoint_url: String,
    /// Preview URL template; `{digest_id}` is substituted.
    pub digest_preview_url: String,
    pub cdn_purge_base_url: String,
    pub cdn_purge_key: String,
    pub cdn_service_ids: Vec<String>,
    pub warehouse_url: String,
    pub warehouse_token: String,

    pub sftp: SftpSettings,
    pub smtp: SmtpSettings,
    /// Sender address for outgoing system email.
    pub sender_email: String,
    /// Admin recipients for deposit status email.
    pub admin_email_recipients: Vec<String>,

    /// IANA timezone name for local-time cron rows.
    pub local_timezone: String,
    /// Directory the file-backed session store writes under.
    pub session_dir: String,
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// A `.env` file is honored when present. Every field has a development
    /// default so a bare environment still yields a usable record.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();
        Self {
            environment: var_or("PUBFLOW_ENV", defaults.environment),
            domain: var_or("PUBFLOW_DOMAIN", defaults.domain),
            storage_provider: var_or("PUBFLOW_STORAGE_PROVIDER", defaults.storage_provider),
            region: var_or("PUBFLOW_REGION", defaults.region),
            default_task_list: var_or("PUBFLOW_TASK_LIST", defaults.default_task_list),
            publishing_bucket: var_or("PUBFLOW_PUBLISHING_BUCKET", defaults.publishing_bucket),
            articles_bucket: var_or("PUBFLOW_ARTICLES_BUCKET", defaults.articles_bucket),
            digests_bucket: var_or("PUBFLOW_DIGESTS_BUCKET", defaults.digests_bucket),
            s3_notification_queue: var_or(
                "PUBFLOW_S3_NOTIFICATION_QUEUE",
                defaults.s3_notification_queue,
            ),
            workflow_starter_queue: var_or(
                "PUBFLOW_WORKFLOW_STARTER_QUEUE",
                defaults.workflow_starter_queue,
            ),
            monitor_queue: var_or("PUBFLOW_MONITOR_QUEUE", defaults.monitor_queue),
            crossref_url: var_or("PUBFLOW_CROSSREF_URL", defaults.crossref_url),
            crossref_login_id: var_or("PUBFLOW_CROSSREF_LOGIN_ID", defaults.crossref_login_id),
            crossref_login_passwd: var_or(
                "PUBFLOW_CROSSREF_LOGIN_PASSWD",
                defaults.crossref_login_passwd,
            ),
            lax_article_versions_url: var_or(
                "PUBFLOW_LAX_ARTICLE_VERSIONS_URL",
                defaults.lax_article_versions_url,
            ),
            digest_endpoint_url: var_or("PUBFLOW_DIGEST_ENDPOINT_URL", defaults.digest_endpoint_url),
            digest_preview_url: var_or("PUBFLOW_DIGEST_PREVIEW_URL", defaults.digest_preview_url),
            cdn_purge_base_url: var_or("PUBFLOW_CDN_PURGE_BASE_URL", defaults.cdn_purge_base_url),
            cdn_purge_key: var_or("PUBFLOW_CDN_PURGE_KEY", defaults.cdn_purge_key),
            cdn_service_ids: var_list("PUBFLOW_CDN_SERVICE_IDS", defaults.cdn_service_ids),
            warehouse_url: var_or("PUBFLOW_WAREHOUSE_URL", defaults.warehouse_url),
            warehouse_token: var_or("PUBFLOW_WAREHOUSE_TOKEN", defaults.warehouse_token),
            sftp: SftpSettings {
                host: var_or("PUBFLOW_SFTP_HOST", defaults.sftp.host),
                port: var_parsed("PUBFLOW_SFTP_PORT", defaults.sftp.port),
                username: var_or("PUBFLOW_SFTP_USERNAME", defaults.sftp.username),
                password: var_or("PUBFLOW_SFTP_PASSWORD", defaults.sftp.password),
                cwd: var_or("PUBFLOW_SFTP_CWD", defaults.sftp.cwd),
            },
            smtp: SmtpSettings {
                host: var_or("PUBFLOW_SMTP_HOST", defaults.smtp.host),
                port: var_parsed("PUBFLOW_SMTP_PORT", defaults.smtp.port),
                starttls: var_parsed("PUBFLOW_SMTP_STARTTLS", defaults.smtp.starttls),
                username: std::env::var("PUBFLOW_SMTP_USERNAME").ok(),
                password: std::env::var("PUBFLOW_SMTP_PASSWORD").ok(),
            },
            sender_email: var_or("PUBFLOW_SENDER_EMAIL", defaults.sender_email),
            admin_email_recipients: var_list(
                "PUBFLOW_ADMIN_EMAIL_RECIPIENTS",
                defaults.admin_email_recipients,
            ),
            local_timezone: var_or("PUBFLOW_LOCAL_TIMEZONE", defaults.local_timezone),
            session_dir: var_or("PUBFLOW_SESSION_DIR", defaults.session_dir),
        }
    }

    /// Convenience for the common `Arc<Settings>` hand-off.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: "dev".into(),
            domain: "pubflow-dev".into(),
            storage_provider: "s3".into(),
            region: "us-east-1".into(),
            default_task_list: "pubflow-default".into(),
            publishing_bucket: "pubflow-packaging".into(),
            articles_bucket: "pubflow-articles".into(),
            digests_bucket: "pubflow-digests".into(),
            s3_notification_queue: "pubflow-incoming".into(),
            workflow_starter_queue: "pubflow-starter".into(),
            monitor_queue: "pubflow-monitor".into(),
            crossref_url: "https://doi.crossref.org/servlet/deposit".into(),
            crossref_login_id: String::new(),
            crossref_login_passwd: String::new(),
            lax_article_versions_url: "https://api.example.org/articles/{article_id}/version/"
                .into(),
            digest_endpoint_url: "https://api.example.org/digests".into(),
            digest_preview_url: "https://example.org/digests/{digest_id}/preview".into(),
            cdn_purge_base_url: "https://api.fastly.com".into(),
            cdn_purge_key: String::new(),
            cdn_service_ids: vec![],
            warehouse_url: String::new(),
            warehouse_token: String::new(),
            sftp: SftpSettings {
                host: "sftp.example.org".into(),
                port: 22,
                username: String::new(),
                password: String::new(),
                cwd: "incoming".into(),
            },
            smtp: SmtpSettings {
                host: "localhost".into(),
                port: 25,
                starttls: false,
                username: None,
                password: None,
            },
            sender_email: "pubflow@example.org".into(),
            admin_email_recipients: vec!["admin@example.org".into()],
            local_timezone: "Europe/London".into(),
            session_dir: ".pubflow/sessions".into(),
        }
    }
}

fn var_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn var_parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn var_list(name: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(name) {
        Ok(value) => value
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let settings = Settings::default();
        assert_eq!(settings.storage_provider, "s3");
        assert!(!settings.default_task_list.is_empty());
        assert!(!settings.admin_email_recipients.is_empty());
    }

    #[test]
    fn recipient_list_parses_commas() {
        let parsed = super::var_list("PUBFLOW_UNSET_TEST_VAR", vec!["a@example.org".into()]);
        assert_eq!(parsed, vec!["a@example.org".to_string()]);
    }
}
