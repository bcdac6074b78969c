//! Google service-account authorization
//!
//! Signs an RS256 JWT assertion with the service account's private key and
//! exchanges it for a short-lived bearer token. Tokens are cached and shared
//! across clones until shortly before they expire.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

pub const EARTH_ENGINE_SCOPE: &str = "https://www.googleapis.com/auth/earthengine";
pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// Refresh this long before the reported expiry
const EXPIRY_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// The fields of a service-account JSON key the pipeline needs
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> AppResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| AppError::Authentication(format!("Invalid service account key: {}", e)))
    }

    pub async fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::Authentication(format!(
                "Cannot read service account key {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&json)
    }
}

/// JWT assertion claims
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
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// Bearer-token source for one service account and scope
#[derive(Clone)]
pub struct GoogleAuth {
    client: Client,
    key: Arc<ServiceAccountKey>,
    scope: String,
    cached: Arc<RwLock<Option<CachedToken>>>,
}

impl GoogleAuth {
    /// Create a token source whose exchange requests time out after `timeout`
    pub fn new(
        key: ServiceAccountKey,
        scope: impl Into<String>,
        timeout: StdDuration,
    ) -> AppResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            AppError::Authentication(format!("Failed to build HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            key: Arc::new(key),
            scope: scope.into(),
            cached: Arc::new(RwLock::new(None)),
        })
    }

    /// Project the service account belongs to, when the key names one
    pub fn project_id(&self) -> Option<&str> {
        self.key.project_id.as_deref()
    }

    /// A valid access token, exchanging a fresh assertion when needed
    pub async fn access_token(&self) -> AppResult<String> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.exchange().await?;
        let token = fresh.token.clone();
        *self.cached.write().await = Some(fresh);
        Ok(token)
    }

    fn assertion(&self, now: DateTime<Utc>) -> AppResult<String> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| AppError::Authentication(format!("Invalid private key: {}", e)))?;

        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| AppError::Authentication(format!("Assertion signing failed: {}", e)))
    }

    async fn exchange(&self) -> AppResult<CachedToken> {
        let now = Utc::now();
        let assertion = self.assertion(now)?;

        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| AppError::Authentication(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Authentication(format!(
                "Token exchange rejected: {} - {}",
                status, body
            )));
        }

        let data: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Authentication(format!("Failed to parse token response: {}", e)))?;

        tracing::debug!(scope = %self.scope, expires_in = data.expires_in, "Obtained access token");

        Ok(CachedToken {
            token: data.access_token,
            expires_at: now + Duration::seconds(data.expires_in),
        })
    }
}
