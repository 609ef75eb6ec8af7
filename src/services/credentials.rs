use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::config::StorageConfig;

/// Seconds before the advertised expiry at which a token is no longer handed out
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Token endpoint unreachable: {0}")]
    Transport(String),

    #[error("Token endpoint rejected the refresh ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Token endpoint response did not contain an access token")]
    MissingAccessToken,
}

/// Bearer credential presented to the storage backend. Replaced wholesale on renewal.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub obtained_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// An `expires_in` too large to represent as a timestamp counts as no known expiry
    pub fn new(access_token: String, expires_in_secs: Option<i64>) -> Self {
        let obtained_at = Utc::now();
        let expires_at = expires_in_secs
            .and_then(Duration::try_seconds)
            .and_then(|lifetime| obtained_at.checked_add_signed(lifetime));
        if expires_in_secs.is_some() && expires_at.is_none() {
            tracing::warn!(
                expires_in = ?expires_in_secs,
                "Token lifetime out of range, treating it as unbounded"
            );
        }
        Self {
            access_token,
            obtained_at,
            expires_at,
        }
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at
                .checked_sub_signed(Duration::seconds(EXPIRY_MARGIN_SECS))
                .is_some_and(|deadline| deadline > now),
            None => true,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Refresh-token grant against an OAuth2 token endpoint
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn exchange(&self, refresh_token: &str) -> Result<Credential, AuthError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
}

pub struct OAuthTokenExchange {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl OAuthTokenExchange {
    pub fn new(
        http: reqwest::Client,
        token_url: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http,
            token_url,
            client_id,
            client_secret,
        }
    }
}

#[async_trait]
impl TokenExchange for OAuthTokenExchange {
    async fn exchange(&self, refresh_token: &str) -> Result<Credential, AuthError> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        match token.access_token {
            Some(access_token) if !access_token.is_empty() => {
                Ok(Credential::new(access_token, token.expires_in))
            }
            _ => Err(AuthError::MissingAccessToken),
        }
    }
}

#[derive(Default)]
struct TokenState {
    credential: Option<Arc<Credential>>,
    /// Bumped after every completed renewal attempt, successful or not
    generation: u64,
    last_error: Option<AuthError>,
}

/// Holds the process-wide storage credential and renews it on demand.
///
/// Renewals are single-flight: callers that observed the same stale state
/// while another renewal was running receive that renewal's outcome instead
/// of issuing their own exchange.
pub struct CredentialBroker {
    exchange: Arc<dyn TokenExchange>,
    refresh_token: String,
    state: RwLock<TokenState>,
    renewal: Mutex<()>,
    renewals: AtomicU64,
}

impl CredentialBroker {
    pub fn new(exchange: Arc<dyn TokenExchange>, refresh_token: String) -> Self {
        Self {
            exchange,
            refresh_token,
            state: RwLock::new(TokenState::default()),
            renewal: Mutex::new(()),
            renewals: AtomicU64::new(0),
        }
    }

    pub fn from_config(http: reqwest::Client, config: &StorageConfig) -> Self {
        let exchange = OAuthTokenExchange::new(
            http,
            config.token_url.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
        );
        Self::new(Arc::new(exchange), config.refresh_token.clone())
    }

    /// Returns the cached credential, renewing it first if absent or about to expire
    pub async fn get_token(&self) -> Result<Arc<Credential>, AuthError> {
        let seen = {
            let state = self.state.read().await;
            if let Some(credential) = &state.credential {
                if credential.is_usable_at(Utc::now()) {
                    return Ok(credential.clone());
                }
            }
            state.generation
        };
        self.renew_from(seen).await
    }

    /// Forces a renewal. Concurrent callers share a single exchange.
    pub async fn refresh(&self) -> Result<Arc<Credential>, AuthError> {
        let seen = self.state.read().await.generation;
        self.renew_from(seen).await
    }

    /// Renews after the backend rejected `stale`, unless it has already been replaced
    pub async fn refresh_after(&self, stale: &Credential) -> Result<Arc<Credential>, AuthError> {
        let seen = {
            let state = self.state.read().await;
            match &state.credential {
                Some(current) if current.access_token != stale.access_token => {
                    return Ok(current.clone());
                }
                _ => state.generation,
            }
        };
        self.renew_from(seen).await
    }

    /// Currently cached credential, without renewing
    pub async fn current(&self) -> Option<Arc<Credential>> {
        self.state.read().await.credential.clone()
    }

    /// Number of token exchanges issued so far
    pub fn renewal_count(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }

    async fn renew_from(&self, seen_generation: u64) -> Result<Arc<Credential>, AuthError> {
        let _guard = self.renewal.lock().await;

        {
            let state = self.state.read().await;
            if state.generation != seen_generation {
                return match (&state.credential, &state.last_error) {
                    (_, Some(err)) => Err(err.clone()),
                    (Some(credential), None) => Ok(credential.clone()),
                    (None, None) => Err(AuthError::MissingAccessToken),
                };
            }
        }

        tracing::info!("🔑 Renewing storage access token");
        self.renewals.fetch_add(1, Ordering::SeqCst);
        let result = self.exchange.exchange(&self.refresh_token).await;

        let mut state = self.state.write().await;
        state.generation += 1;
        match result {
            Ok(credential) => {
                tracing::info!(
                    expires_at = ?credential.expires_at,
                    "✅ Storage access token renewed"
                );
                let credential = Arc::new(credential);
                state.credential = Some(credential.clone());
                state.last_error = None;
                Ok(credential)
            }
            Err(e) => {
                tracing::error!("❌ Storage access token renewal failed: {}", e);
                state.credential = None;
                state.last_error = Some(e.clone());
                Err(e)
            }
        }
    }
}
