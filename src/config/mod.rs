use std::env;
use thiserror::Error;

use crate::services::scheduler::DEFAULT_MAX_CONCURRENCY;
use crate::services::uploader::DEFAULT_CHUNK_SIZE;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Which storage implementation backs the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Dropbox,
    /// Process-local storage, for local runs without a Dropbox app
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dropbox" => Ok(Self::Dropbox),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend '{}' (dropbox, memory)", other)),
        }
    }
}

/// How notifications leave the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailTransport {
    Smtp,
    /// Write messages to the log only
    Log,
}

impl std::str::FromStr for MailTransport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smtp" => Ok(Self::Smtp),
            "log" => Ok(Self::Log),
            other => Err(format!("unknown mail transport '{}' (smtp, log)", other)),
        }
    }
}

/// Remote storage (Dropbox) application credentials and endpoints
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,

    /// RPC endpoint host (default: "https://api.dropboxapi.com")
    pub api_url: String,

    /// Content endpoint host used for upload sessions (default: "https://content.dropboxapi.com")
    pub content_url: String,

    /// OAuth2 token endpoint (default: "https://api.dropboxapi.com/oauth2/token")
    pub token_url: String,
}

/// Outbound mail account
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub from_email: String,
    pub admin_email: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// STORAGE_BACKEND (default: dropbox)
    pub storage_backend: StorageBackend,

    /// MAIL_TRANSPORT (default: smtp)
    pub mail_transport: MailTransport,

    pub storage: StorageConfig,
    pub mail: MailConfig,

    /// Root folder under which one container per submission is created (default: "/formularios")
    pub container_root: String,

    /// Upload session chunk size in bytes (default: 8 MiB)
    pub chunk_size: usize,

    /// Files uploaded simultaneously per submission (default: 4)
    pub max_concurrent_uploads: usize,

    /// Overall deadline for the upload phase of one submission (default: 300)
    pub submission_timeout_secs: u64,

    /// Maximum request body in bytes (default: 512 MB)
    pub max_body_size: usize,

    /// Listen port (default: 3000)
    pub port: u16,
}

impl AppConfig {
    /// Load configuration from environment variables, failing on anything missing or malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        let default = Self::development();
        let storage_backend = parse_or("STORAGE_BACKEND", StorageBackend::Dropbox)?;
        let mail_transport = parse_or("MAIL_TRANSPORT", MailTransport::Smtp)?;

        let mut missing = Vec::new();
        let mut required = |name: &'static str, needed: bool, fallback: &str| match env::var(name)
        {
            Ok(v) if !v.trim().is_empty() => v,
            _ if needed => {
                missing.push(name);
                String::new()
            }
            _ => fallback.to_string(),
        };

        let dropbox = storage_backend == StorageBackend::Dropbox;
        let smtp = mail_transport == MailTransport::Smtp;
        let client_id = required("DROPBOX_APP_KEY", dropbox, &default.storage.client_id);
        let client_secret = required("DROPBOX_APP_SECRET", dropbox, &default.storage.client_secret);
        let refresh_token =
            required("DROPBOX_REFRESH_TOKEN", dropbox, &default.storage.refresh_token);
        let smtp_user = required("SMTP_USER", smtp, &default.mail.smtp_user);
        let smtp_pass = required("SMTP_PASS", smtp, &default.mail.smtp_pass);
        let from_email = required("FROM_EMAIL", true, "");
        let admin_email = required("ADMIN_EMAIL", true, "");

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let config = Self {
            storage_backend,
            mail_transport,
            storage: StorageConfig {
                client_id,
                client_secret,
                refresh_token,
                api_url: env::var("DROPBOX_API_URL").unwrap_or(default.storage.api_url),
                content_url: env::var("DROPBOX_CONTENT_URL")
                    .unwrap_or(default.storage.content_url),
                token_url: env::var("DROPBOX_TOKEN_URL").unwrap_or(default.storage.token_url),
            },
            mail: MailConfig {
                smtp_host: env::var("SMTP_HOST").unwrap_or(default.mail.smtp_host),
                smtp_port: parse_or("SMTP_PORT", default.mail.smtp_port)?,
                smtp_user,
                smtp_pass,
                from_email,
                admin_email,
            },
            container_root: env::var("CONTAINER_ROOT").unwrap_or(default.container_root),
            chunk_size: parse_or("CHUNK_SIZE", default.chunk_size)?,
            max_concurrent_uploads: parse_or(
                "MAX_CONCURRENT_UPLOADS",
                default.max_concurrent_uploads,
            )?,
            submission_timeout_secs: parse_or(
                "SUBMISSION_TIMEOUT_SECS",
                default.submission_timeout_secs,
            )?,
            max_body_size: parse_or("MAX_BODY_SIZE", default.max_body_size)?,
            port: parse_or("PORT", default.port)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Fully populated config pointing at the public endpoints with placeholder secrets
    pub fn development() -> Self {
        Self {
            storage_backend: StorageBackend::Memory,
            mail_transport: MailTransport::Log,
            storage: StorageConfig {
                client_id: "dev-app-key".to_string(),
                client_secret: "dev-app-secret".to_string(),
                refresh_token: "dev-refresh-token".to_string(),
                api_url: "https://api.dropboxapi.com".to_string(),
                content_url: "https://content.dropboxapi.com".to_string(),
                token_url: "https://api.dropboxapi.com/oauth2/token".to_string(),
            },
            mail: MailConfig {
                smtp_host: "smtp.gmail.com".to_string(),
                smtp_port: 587,
                smtp_user: "dev@localhost".to_string(),
                smtp_pass: "dev".to_string(),
                from_email: "no-reply@localhost".to_string(),
                admin_email: "admin@localhost".to_string(),
            },
            container_root: "/formularios".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENCY,
            submission_timeout_secs: 300,
            max_body_size: 512 * 1024 * 1024,
            port: 3000,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid {
                name: "CHUNK_SIZE",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_concurrent_uploads == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_CONCURRENT_UPLOADS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.submission_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "SUBMISSION_TIMEOUT_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !self.container_root.starts_with('/') {
            return Err(ConfigError::Invalid {
                name: "CONTAINER_ROOT",
                reason: format!("'{}' must be an absolute path", self.container_root),
            });
        }
        Ok(())
    }
}

fn parse_or<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
