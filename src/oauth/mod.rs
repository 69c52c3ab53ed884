//! OAuth credential lifecycle
//!
//! Keeps every mail-source call backed by a non-expired access token.
//! The guard refreshes proactively (5 minutes before expiry), makes exactly
//! one refresh attempt per call, and persists a successful refresh as a
//! single atomic replace of the whole token triple. Retry policy belongs to
//! the caller of the reconciliation, not here.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::OAuthConfig;
use crate::store::CredentialStore;
use crate::types::Credential;

/// Refresh this long before the recorded expiry
pub const REFRESH_SKEW: Duration = Duration::minutes(5);

/// Errors that end a mailbox run and require operator attention
/// ("reconnect account") rather than blind retry
#[derive(Debug, Clone, Error)]
pub enum CredentialError {
    /// No credential, or no refresh token, is stored for the mailbox
    #[error("no usable credential stored for this mailbox")]
    Missing,

    /// The provider reported the refresh token as expired
    #[error("refresh token expired: {0}")]
    Expired(String),

    /// The provider rejected the refresh token (revoked consent, rotated secret)
    #[error("refresh token rejected: {0}")]
    Revoked(String),

    /// The token endpoint could not be reached or answered 5xx
    #[error("token endpoint unreachable: {0}")]
    Network(String),

    /// The credential store itself failed
    #[error("credential store error: {0}")]
    Store(String),
}

/// OAuth token endpoint operations
///
/// One implementation talks HTTP; tests substitute failures to verify the
/// stored credential is never half-replaced.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a refresh token for a new access/refresh/expiry triple
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, CredentialError>;

    /// Exchange an authorization code (mailbox connect flow)
    async fn exchange_code(&self, code: &str) -> Result<Credential, CredentialError>;
}

/// Wire format of a token endpoint success response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// Wire format of a token endpoint error body
#[derive(Debug, Deserialize, Default)]
struct TokenErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// HTTP implementation of the token endpoint
pub struct HttpTokenEndpoint {
    http: reqwest::Client,
    config: OAuthConfig,
}

impl HttpTokenEndpoint {
    pub fn new(http: reqwest::Client, config: OAuthConfig) -> Self {
        Self { http, config }
    }

    async fn post_grant(
        &self,
        params: &[(&str, &str)],
    ) -> Result<Credential, CredentialError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| CredentialError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Token grant failed ({}): {}", status, body);
            return Err(classify_grant_failure(status, &body));
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::Network(format!("malformed token response: {}", e)))?;

        let expires_at = tokens
            .expires_in
            .map(|secs| Utc::now() + Duration::seconds(secs as i64));

        Ok(Credential {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_at,
        })
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> Result<Credential, CredentialError> {
        debug!("Refreshing access token");
        self.post_grant(&[
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
            ("scope", &self.config.scope),
        ])
        .await
    }

    async fn exchange_code(&self, code: &str) -> Result<Credential, CredentialError> {
        debug!("Exchanging authorization code for tokens");
        self.post_grant(&[
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
            ("code", code),
            ("redirect_uri", &self.config.redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
    }
}

/// Map a non-success token endpoint response onto the credential taxonomy
fn classify_grant_failure(status: reqwest::StatusCode, body: &str) -> CredentialError {
    if status.is_server_error() {
        return CredentialError::Network(format!("{}: {}", status, body));
    }

    let parsed: TokenErrorBody = serde_json::from_str(body).unwrap_or_default();
    let detail = if parsed.error_description.is_empty() {
        body.to_string()
    } else {
        parsed.error_description.clone()
    };

    match parsed.error.as_str() {
        "invalid_grant" => {
            if detail.to_lowercase().contains("expired") {
                CredentialError::Expired(detail)
            } else {
                CredentialError::Revoked(detail)
            }
        }
        "invalid_client" | "unauthorized_client" => CredentialError::Revoked(detail),
        _ => CredentialError::Network(format!("{}: {}", status, detail)),
    }
}

/// Decide whether a stored credential needs a refresh before use
fn needs_refresh(credential: &Credential, now: DateTime<Utc>) -> bool {
    match credential.expires_at {
        Some(expires_at) => now + REFRESH_SKEW >= expires_at,
        // No expiry recorded: assume stale
        None => true,
    }
}

/// Guard that yields a valid access token for a mailbox, refreshing as needed
pub struct TokenGuard {
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn CredentialStore>,
}

impl TokenGuard {
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, store: Arc<dyn CredentialStore>) -> Self {
        Self { endpoint, store }
    }

    /// Return a non-expired access token for the mailbox.
    ///
    /// Performs at most one refresh. On refresh failure the stored
    /// credential is left untouched so the operator can still inspect it,
    /// and the error says whether reconnecting the account is required.
    pub async fn get_valid_access_token(
        &self,
        mailbox_id: &str,
    ) -> Result<String, CredentialError> {
        let credential = self
            .store
            .get(mailbox_id)
            .map_err(|e| CredentialError::Store(e.to_string()))?
            .ok_or(CredentialError::Missing)?;

        if !needs_refresh(&credential, Utc::now()) {
            return Ok(credential.access_token);
        }

        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or(CredentialError::Missing)?;

        let mut renewed = self.endpoint.refresh(&refresh_token).await?;

        // Some providers omit the refresh token on rotation; keep the
        // current one so the triple stays internally consistent.
        if renewed.refresh_token.is_none() {
            renewed.refresh_token = Some(refresh_token);
        }

        self.store
            .replace_atomic(mailbox_id, &renewed)
            .map_err(|e| CredentialError::Store(e.to_string()))?;

        info!("Refreshed credential for mailbox {}", mailbox_id);
        Ok(renewed.access_token)
    }
}
