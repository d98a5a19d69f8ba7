//! Token endpoint client: authorization-code exchange and refresh.

use crate::endpoint::EndpointState;
use crate::snapshot::{Role, Specialty};
use crate::{CredentialError, CredentialResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Response body of a successful authorization-code exchange.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenExchangeResponse {
    pub access_token: String,
    /// Seconds from receipt until the access token expires.
    pub access_expiry_interval: i64,
    pub refresh_token: String,
    /// Seconds from receipt until the refresh token expires.
    pub refresh_expiry_interval: i64,
    pub role_scope: Role,
    #[serde(default)]
    pub capabilities: Option<BTreeSet<String>>,
    #[serde(default)]
    pub specialties: Option<Vec<Specialty>>,
}

/// Response body of a successful refresh.
///
/// The refresh token is only rotated when both `refresh_token` and
/// `refresh_expiry_interval` are present.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub access_expiry_interval: i64,
    pub role_scope: Role,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_expiry_interval: Option<i64>,
}

/// A full credential set with absolute expiry times.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenGrant {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub role: Role,
    pub capabilities: BTreeSet<String>,
    pub specialties: Vec<Specialty>,
}

/// A rotated refresh token and its absolute expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct RotatedRefreshToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// The fields a refresh replaces, with absolute expiry times.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshGrant {
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    pub role: Role,
    pub rotated: Option<RotatedRefreshToken>,
}

fn expiry_from(received_at: DateTime<Utc>, seconds: i64, field: &str) -> CredentialResult<DateTime<Utc>> {
    if seconds < 0 {
        return Err(CredentialError::DecodeFailure(format!(
            "{} must not be negative",
            field
        )));
    }
    Duration::try_seconds(seconds)
        .and_then(|interval| received_at.checked_add_signed(interval))
        .ok_or_else(|| CredentialError::DecodeFailure(format!("{} is out of range", field)))
}

fn require_token(token: &str, field: &str) -> CredentialResult<()> {
    if token.is_empty() {
        return Err(CredentialError::DecodeFailure(format!("{} is empty", field)));
    }
    Ok(())
}

impl TokenExchangeResponse {
    /// Resolve relative intervals against `received_at`.
    pub fn into_grant(self, received_at: DateTime<Utc>) -> CredentialResult<TokenGrant> {
        require_token(&self.access_token, "access_token")?;
        require_token(&self.refresh_token, "refresh_token")?;

        Ok(TokenGrant {
            access_token_expires_at: expiry_from(
                received_at,
                self.access_expiry_interval,
                "access_expiry_interval",
            )?,
            refresh_token_expires_at: expiry_from(
                received_at,
                self.refresh_expiry_interval,
                "refresh_expiry_interval",
            )?,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            role: self.role_scope,
            capabilities: self.capabilities.unwrap_or_default(),
            specialties: self.specialties.unwrap_or_default(),
        })
    }
}

impl TokenRefreshResponse {
    /// Resolve relative intervals against `received_at`.
    pub fn into_grant(self, received_at: DateTime<Utc>) -> CredentialResult<RefreshGrant> {
        require_token(&self.access_token, "access_token")?;

        let rotated = match (self.refresh_token, self.refresh_expiry_interval) {
            (Some(token), Some(interval)) => {
                require_token(&token, "refresh_token")?;
                Some(RotatedRefreshToken {
                    token,
                    expires_at: expiry_from(received_at, interval, "refresh_expiry_interval")?,
                })
            }
            (Some(_), None) => {
                debug!("Refresh response carried a token without an expiry; keeping current refresh token");
                None
            }
            _ => None,
        };

        Ok(RefreshGrant {
            access_token_expires_at: expiry_from(
                received_at,
                self.access_expiry_interval,
                "access_expiry_interval",
            )?,
            access_token: self.access_token,
            role: self.role_scope,
            rotated,
        })
    }
}

/// Network operations the session layer needs from the auth service.
#[async_trait]
pub trait TokenTransport: Send + Sync {
    /// Exchange a one-time authorization code for a full credential set.
    async fn exchange_code(&self, code: &str) -> CredentialResult<TokenExchangeResponse>;

    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> CredentialResult<TokenRefreshResponse>;
}

#[derive(Debug, Serialize)]
struct CodeExchangeRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// HTTP implementation of [`TokenTransport`].
///
/// The base URL is read from the shared [`EndpointState`] on every request,
/// so an endpoint enrolled after construction is picked up.
pub struct HttpTokenClient {
    endpoint: Arc<EndpointState>,
    http_client: Client,
}

impl HttpTokenClient {
    pub fn new(endpoint: Arc<EndpointState>, timeout: std::time::Duration) -> CredentialResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CredentialError::Unknown(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            http_client,
        })
    }

    fn token_url(&self, grant_type: &str) -> CredentialResult<String> {
        let base_url = self.endpoint.base_url().ok_or_else(|| {
            CredentialError::IllegalArgument("no service endpoint is enrolled".to_string())
        })?;
        Ok(format!(
            "{}/auth/v1/token?grant_type={}",
            base_url.as_str().trim_end_matches('/'),
            grant_type
        ))
    }

    async fn post_token<B, R>(&self, grant_type: &str, body: &B) -> CredentialResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.token_url(grant_type)?;
        debug!(grant_type = %grant_type, "Posting token request");

        let response = self.http_client.post(&url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            warn!(grant_type = %grant_type, status = %status, "Token request rejected");
            return Err(CredentialError::Forbidden(text));
        }
        if !status.is_success() {
            warn!(grant_type = %grant_type, status = %status, "Token request failed");
            return Err(CredentialError::UnexpectedResponse {
                status: Some(status.as_u16()),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| CredentialError::DecodeFailure(e.to_string()))
    }
}

#[async_trait]
impl TokenTransport for HttpTokenClient {
    async fn exchange_code(&self, code: &str) -> CredentialResult<TokenExchangeResponse> {
        self.post_token("authorization_code", &CodeExchangeRequest { code })
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> CredentialResult<TokenRefreshResponse> {
        self.post_token("refresh_token", &RefreshRequest { refresh_token })
            .await
    }
}
