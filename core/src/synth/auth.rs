use super::SynthesisError;
use crate::{Result, WavenetError};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the token actually expires
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Source of OAuth bearer tokens for the synthesis API
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> std::result::Result<String, SynthesisError>;
}

/// Serves one fixed token.
pub struct StaticTokenSource(String);

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> std::result::Result<String, SynthesisError> {
        Ok(self.0.clone())
    }
}

/// Fields we need from a Google service-account key file
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Exchanges a signed service-account JWT for an access token and caches it
/// until shortly before it expires.
pub struct ServiceAccountTokenSource {
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    http: reqwest::Client,
    timeout_ms: u64,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(key: ServiceAccountKey, timeout_ms: u64) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| WavenetError::Config(format!("invalid service account key: {}", e)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| WavenetError::Config(format!("failed to build HTTP client: {}", e)))?;

        info!(target: "wavenet", client_email = %key.client_email, "Loaded service account credentials");
        Ok(Self {
            key,
            encoding_key,
            http,
            timeout_ms,
            cached: Mutex::new(None),
        })
    }

    /// Load the key from a credentials JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WavenetError::Config(format!(
                "cannot read credentials {}: {}",
                path.display(),
                e
            ))
        })?;
        let key: ServiceAccountKey = serde_json::from_str(&raw).map_err(|e| {
            WavenetError::Config(format!(
                "invalid credentials {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::new(key, timeout_ms)
    }

    fn signed_assertion(&self) -> std::result::Result<String, SynthesisError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| SynthesisError::Auth(format!("failed to sign assertion: {}", e)))
    }

    async fn fetch(&self) -> std::result::Result<CachedToken, SynthesisError> {
        let assertion = self.signed_assertion()?;
        debug!(target: "wavenet", token_uri = %self.key.token_uri, "Requesting access token");

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SynthesisError::Timeout(self.timeout_ms)
                } else {
                    SynthesisError::Auth(format!("token request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "wavenet", status = %status, "Token endpoint returned error");
            return Err(SynthesisError::Auth(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::Auth(format!("invalid token response: {}", e)))?;

        let lifetime = Duration::from_secs(parsed.expires_in).saturating_sub(EXPIRY_MARGIN);
        Ok(CachedToken {
            token: parsed.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn token(&self) -> std::result::Result<String, SynthesisError> {
        // Held across the fetch so concurrent callers share one refresh
        let mut cached = self.cached.lock().await;
        if let Some(c) = cached.as_ref() {
            if Instant::now() < c.refresh_at {
                return Ok(c.token.clone());
            }
        }
        let fresh = self.fetch().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}
