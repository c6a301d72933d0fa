//! Credentials for the history API
//!
//! A [`Credential`] is acquired once before a run and passed by reference to
//! every fetch. Expiry is reported, never refreshed.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, info};

/// Token endpoint path
pub const TOKEN_ENDPOINT: &str = "/account/v1.0/token";

/// Lifetime assumed when the token endpoint does not report one
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Bearer token with its expiry
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    valid_until: DateTime<Utc>,
}

impl Credential {
    /// Create a credential valid until `valid_until`
    pub fn new(token: impl Into<String>, valid_until: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            valid_until,
        }
    }

    /// Raw bearer token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Expiry instant
    pub fn valid_until(&self) -> DateTime<Utc> {
        self.valid_until
    }

    /// Whether the credential has expired now
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the credential has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_until
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("valid_until", &self.valid_until)
            .finish()
    }
}

/// Credential acquisition errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// A required setting is missing
    #[error("missing credential setting: {0}")]
    MissingSetting(&'static str),

    /// Token request failed in transport
    #[error("token request failed: {0}")]
    Http(String),

    /// Token endpoint rejected the request
    #[error("token request rejected (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Rejection message
        message: String,
    },

    /// Token response could not be decoded
    #[error("malformed token response: {0}")]
    Malformed(String),
}

/// Source of the run's credential
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Acquire a credential. Called once per run.
    async fn acquire(&self) -> Result<Credential, CredentialError>;
}

/// Account settings for the token endpoint
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ApiCredentials {
    /// Application id
    pub app_id: String,
    /// Application secret
    pub app_secret: String,
    /// Account email
    pub email: String,
    /// Account password
    pub password: String,
    /// Organisation id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
}

impl ApiCredentials {
    /// First missing required field, if any
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("app_id", &self.app_id),
            ("app_secret", &self.app_secret),
            ("email", &self.email),
            ("password", &self.password),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("app_id", &self.app_id)
            .field("app_secret", &"<redacted>")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("org_id", &self.org_id)
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest<'a> {
    app_secret: &'a str,
    email: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    org_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default, deserialize_with = "de_opt_seconds")]
    expires_in: Option<i64>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    msg: Option<String>,
}

/// Acquires a token from the account endpoint
#[derive(Debug, Clone)]
pub struct ApiCredentialProvider {
    client: Client,
    base_url: String,
    credentials: ApiCredentials,
}

impl ApiCredentialProvider {
    /// Create a provider posting to `{base_url}/account/v1.0/token`
    pub fn new(client: Client, base_url: impl Into<String>, credentials: ApiCredentials) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }
}

#[async_trait]
impl CredentialProvider for ApiCredentialProvider {
    async fn acquire(&self) -> Result<Credential, CredentialError> {
        if let Some(field) = self.credentials.missing_field() {
            return Err(CredentialError::MissingSetting(field));
        }

        let url = format!("{}{}", self.base_url, TOKEN_ENDPOINT);
        let body = TokenRequest {
            app_secret: &self.credentials.app_secret,
            email: &self.credentials.email,
            password: &self.credentials.password,
            org_id: self.credentials.org_id.as_deref(),
        };

        debug!(url = %url, "Requesting access token");
        let started = std::time::Instant::now();

        let response = self
            .client
            .post(&url)
            .query(&[("language", "en"), ("appId", self.credentials.app_id.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| CredentialError::Http(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CredentialError::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
                message: text.trim().to_string(),
            });
        }

        let credential = parse_token_response(&text, Utc::now())?;
        info!(
            valid_until = %credential.valid_until(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Acquired access token"
        );
        Ok(credential)
    }
}

/// Decode a token endpoint body, stamping expiry relative to `now`.
pub fn parse_token_response(body: &str, now: DateTime<Utc>) -> Result<Credential, CredentialError> {
    let response: TokenResponse =
        serde_json::from_str(body).map_err(|e| CredentialError::Malformed(e.to_string()))?;

    if response.success == Some(false) {
        return Err(CredentialError::Rejected {
            status: 200,
            message: response.msg.unwrap_or_default(),
        });
    }

    let token = response
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| CredentialError::Malformed("missing access_token".to_string()))?;
    let lifetime = response
        .expires_in
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

    Ok(Credential::new(token, now + Duration::seconds(lifetime)))
}

fn de_opt_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Hands out a pre-issued token
#[derive(Clone)]
pub struct StaticCredentialProvider {
    token: String,
    lifetime: Duration,
}

impl StaticCredentialProvider {
    /// Serve `token`, assumed valid for `lifetime` from acquisition
    pub fn new(token: impl Into<String>, lifetime: Duration) -> Self {
        Self {
            token: token.into(),
            lifetime,
        }
    }
}

impl fmt::Debug for StaticCredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentialProvider")
            .field("token", &"<redacted>")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn acquire(&self) -> Result<Credential, CredentialError> {
        if self.token.trim().is_empty() {
            return Err(CredentialError::MissingSetting("token"));
        }
        Ok(Credential::new(self.token.clone(), Utc::now() + self.lifetime))
    }
}
