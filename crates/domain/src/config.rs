//! Environment-driven configuration structures shared by all binaries.

use std::{env, time::Duration};

use thiserror::Error;

const DEFAULT_JOURNAL_NAME: &str = "Law Journal";
const DEFAULT_QR_SERVICE_URL: &str = "https://api.qrserver.com/v1/create-qr-code/";
const DEFAULT_MAIL_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OUTBOX_POLL_SECS: u64 = 15;
const DEFAULT_OUTBOX_MAX_ATTEMPTS: u32 = 8;
const DEFAULT_OUTBOX_BATCH_SIZE: u64 = 20;

/// API-specific configuration (HTTP bind + shared database) so the HTTP
/// surface does not depend on worker-only environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    database_url: String,
    api_bind_address: String,
    api_unix_socket: Option<String>,
    internal_bind_address: Option<String>,
    internal_unix_socket: Option<String>,
}

impl ApiConfig {
    /// Loads only the environment variables required by the API binary.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            api_bind_address: get_required_var("API_BIND_ADDRESS")?,
            api_unix_socket: get_optional_var("API_UNIX_SOCKET"),
            internal_bind_address: get_optional_var("API_INTERNAL_BIND_ADDRESS"),
            internal_unix_socket: get_optional_var("API_INTERNAL_UNIX_SOCKET"),
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn api_unix_socket(&self) -> Option<&str> {
        self.api_unix_socket.as_deref()
    }

    pub fn internal_bind_address(&self) -> Option<&str> {
        self.internal_bind_address.as_deref()
    }

    pub fn internal_unix_socket(&self) -> Option<&str> {
        self.internal_unix_socket.as_deref()
    }

    pub fn has_internal_listener(&self) -> bool {
        self.internal_bind_address.is_some() || self.internal_unix_socket.is_some()
    }
}

/// Values the workflow needs to build links and payment instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    public_base_url: String,
    journal_name: String,
    payment_upi_id: String,
    payment_payee_name: String,
    publication_fee: u64,
    qr_service_url: String,
}

impl WorkflowConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let publication_fee = get_required_var("PUBLICATION_FEE")?
            .parse()
            .map_err(|source| ConfigError::InvalidNumber {
                key: "PUBLICATION_FEE",
                source,
            })?;

        Ok(Self {
            public_base_url: get_required_var("PUBLIC_BASE_URL")?,
            journal_name: get_optional_var("JOURNAL_NAME")
                .unwrap_or_else(|| DEFAULT_JOURNAL_NAME.to_string()),
            payment_upi_id: get_required_var("PAYMENT_UPI_ID")?,
            payment_payee_name: get_required_var("PAYMENT_PAYEE_NAME")?,
            publication_fee,
            qr_service_url: get_optional_var("QR_SERVICE_URL")
                .unwrap_or_else(|| DEFAULT_QR_SERVICE_URL.to_string()),
        })
    }

    /// Builds a config without touching the environment (tests, embedding).
    pub fn new(
        public_base_url: impl Into<String>,
        journal_name: impl Into<String>,
        payment_upi_id: impl Into<String>,
        payment_payee_name: impl Into<String>,
        publication_fee: u64,
    ) -> Self {
        Self {
            public_base_url: public_base_url.into(),
            journal_name: journal_name.into(),
            payment_upi_id: payment_upi_id.into(),
            payment_payee_name: payment_payee_name.into(),
            publication_fee,
            qr_service_url: DEFAULT_QR_SERVICE_URL.to_string(),
        }
    }

    pub fn with_qr_service_url(mut self, url: impl Into<String>) -> Self {
        self.qr_service_url = url.into();
        self
    }

    /// Base URL without a trailing slash so links can be joined with `/`.
    pub fn public_base_url(&self) -> &str {
        self.public_base_url.trim_end_matches('/')
    }

    pub fn journal_name(&self) -> &str {
        &self.journal_name
    }

    pub fn payment_upi_id(&self) -> &str {
        &self.payment_upi_id
    }

    pub fn payment_payee_name(&self) -> &str {
        &self.payment_payee_name
    }

    pub fn publication_fee(&self) -> u64 {
        self.publication_fee
    }

    pub fn qr_service_url(&self) -> &str {
        &self.qr_service_url
    }
}

/// Sender identity and transport endpoint for outgoing mail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailConfig {
    api_url: String,
    api_key: String,
    from_address: String,
    from_name: String,
    timeout: Duration,
}

impl MailConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let timeout_secs = match get_optional_var("MAIL_TIMEOUT_SECS") {
            Some(raw) => raw.parse().map_err(|source| ConfigError::InvalidNumber {
                key: "MAIL_TIMEOUT_SECS",
                source,
            })?,
            None => DEFAULT_MAIL_TIMEOUT_SECS,
        };

        Ok(Self {
            api_url: get_required_var("MAIL_API_URL")?,
            api_key: get_required_var("MAIL_API_KEY")?,
            from_address: get_required_var("MAIL_FROM_ADDRESS")?,
            from_name: get_required_var("MAIL_FROM_NAME")?,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }

    pub fn new(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        from_address: impl Into<String>,
        from_name: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            from_address: from_address.into(),
            from_name: from_name.into(),
            timeout: Duration::from_secs(DEFAULT_MAIL_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn from_address(&self) -> &str {
        &self.from_address
    }

    pub fn from_name(&self) -> &str {
        &self.from_name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Settings for the outbox delivery worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    database_url: String,
    poll_interval: Duration,
    max_attempts: u32,
    batch_size: u64,
}

impl OutboxConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let poll_secs = parse_optional_u64("OUTBOX_POLL_INTERVAL_SECS")?
            .unwrap_or(DEFAULT_OUTBOX_POLL_SECS);
        let max_attempts = parse_optional_u64("OUTBOX_MAX_ATTEMPTS")?
            .map(|value| value.min(u32::MAX as u64) as u32)
            .unwrap_or(DEFAULT_OUTBOX_MAX_ATTEMPTS);
        let batch_size =
            parse_optional_u64("OUTBOX_BATCH_SIZE")?.unwrap_or(DEFAULT_OUTBOX_BATCH_SIZE);

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            poll_interval: Duration::from_secs(poll_secs.max(1)),
            max_attempts: max_attempts.max(1),
            batch_size: batch_size.max(1),
        })
    }

    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            poll_interval: Duration::from_secs(DEFAULT_OUTBOX_POLL_SECS),
            max_attempts: DEFAULT_OUTBOX_MAX_ATTEMPTS,
            batch_size: DEFAULT_OUTBOX_BATCH_SIZE,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(ConfigError::MissingVar { key })
            } else {
                Ok(trimmed.to_string())
            }
        }
        Err(_) => Err(ConfigError::MissingVar { key }),
    }
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_optional_u64(key: &'static str) -> Result<Option<u64>, ConfigError> {
    get_optional_var(key)
        .map(|raw| {
            raw.parse()
                .map_err(|source| ConfigError::InvalidNumber { key, source })
        })
        .transpose()
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("LAW_JOURNAL_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    fn set_env() {
        std::env::set_var("LAW_JOURNAL_SKIP_DOTENV", "1");
        std::env::set_var("DATABASE_URL", "sqlite://test.db");
        std::env::set_var("API_BIND_ADDRESS", "127.0.0.1:8080");
        std::env::remove_var("API_UNIX_SOCKET");
        std::env::remove_var("API_INTERNAL_BIND_ADDRESS");
        std::env::remove_var("API_INTERNAL_UNIX_SOCKET");
        std::env::set_var("PUBLIC_BASE_URL", "https://journal.example/");
        std::env::remove_var("JOURNAL_NAME");
        std::env::set_var("PAYMENT_UPI_ID", "journal@upi");
        std::env::set_var("PAYMENT_PAYEE_NAME", "Journal Trust");
        std::env::set_var("PUBLICATION_FEE", "1500");
        std::env::remove_var("QR_SERVICE_URL");
        std::env::set_var("MAIL_API_URL", "https://mail.example/send");
        std::env::set_var("MAIL_API_KEY", "secret");
        std::env::set_var("MAIL_FROM_ADDRESS", "editor@journal.example");
        std::env::set_var("MAIL_FROM_NAME", "Editorial Board");
        std::env::remove_var("MAIL_TIMEOUT_SECS");
        std::env::remove_var("OUTBOX_POLL_INTERVAL_SECS");
        std::env::remove_var("OUTBOX_MAX_ATTEMPTS");
        std::env::remove_var("OUTBOX_BATCH_SIZE");
    }

    #[test]
    fn api_config_only_requires_api_env() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::remove_var("MAIL_API_URL");
        std::env::set_var("DATABASE_URL", "sqlite://api-only.db");
        std::env::set_var("API_BIND_ADDRESS", "127.0.0.1:9999");

        let config = ApiConfig::load_from_env().expect("api config loads");
        assert_eq!(config.database_url(), "sqlite://api-only.db");
        assert_eq!(config.api_bind_address(), "127.0.0.1:9999");
        assert!(!config.has_internal_listener());

        set_env();
    }

    #[test]
    fn api_config_supports_unix_and_internal_listeners() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("API_UNIX_SOCKET", "/tmp/api.sock");
        std::env::set_var("API_INTERNAL_BIND_ADDRESS", "127.0.0.1:9090");
        std::env::set_var("API_INTERNAL_UNIX_SOCKET", "/tmp/api-internal.sock");

        let config = ApiConfig::load_from_env().expect("config loads");
        assert_eq!(config.api_unix_socket(), Some("/tmp/api.sock"));
        assert_eq!(config.internal_bind_address(), Some("127.0.0.1:9090"));
        assert_eq!(
            config.internal_unix_socket(),
            Some("/tmp/api-internal.sock")
        );
        assert!(config.has_internal_listener());

        set_env();
    }

    #[test]
    fn empty_required_env_var_is_treated_as_missing() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("DATABASE_URL", "   ");

        let err = ApiConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingVar {
                key: "DATABASE_URL"
            }
        ));

        set_env();
    }

    #[test]
    fn workflow_config_applies_defaults() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();

        let config = WorkflowConfig::load_from_env().expect("workflow config loads");
        assert_eq!(config.public_base_url(), "https://journal.example");
        assert_eq!(config.journal_name(), "Law Journal");
        assert_eq!(config.publication_fee(), 1500);
        assert_eq!(config.qr_service_url(), DEFAULT_QR_SERVICE_URL);
    }

    #[test]
    fn workflow_config_rejects_non_numeric_fee() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("PUBLICATION_FEE", "free");

        let err = WorkflowConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                key: "PUBLICATION_FEE",
                ..
            }
        ));

        set_env();
    }

    #[test]
    fn mail_config_reads_timeout() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();

        let config = MailConfig::load_from_env().expect("mail config loads");
        assert_eq!(config.timeout(), Duration::from_secs(10));

        std::env::set_var("MAIL_TIMEOUT_SECS", "3");
        let config = MailConfig::load_from_env().expect("mail config loads");
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert_eq!(config.from_name(), "Editorial Board");

        set_env();
    }

    #[test]
    fn outbox_config_reads_overrides() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("OUTBOX_MAX_ATTEMPTS", "3");
        std::env::set_var("OUTBOX_BATCH_SIZE", "0");

        let config = OutboxConfig::load_from_env().expect("outbox config loads");
        assert_eq!(config.poll_interval(), Duration::from_secs(15));
        assert_eq!(config.max_attempts(), 3);
        assert_eq!(config.batch_size(), 1);

        set_env();
    }
}
