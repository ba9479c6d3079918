use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ServiceConfig;
use crate::error::{parse_error_payload, MediaError, Result};

/// Refresh tokens this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    // v1 endpoints send this as a string
    expires_in: Seconds,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Seconds {
    Number(u64),
    Text(String),
}

impl Seconds {
    fn as_duration(&self) -> Result<Duration> {
        let secs = match self {
            Seconds::Number(n) => *n,
            Seconds::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| MediaError::Auth(format!("Invalid token lifetime '{}'", s)))?,
        };
        Ok(Duration::from_secs(secs))
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Client-credentials access tokens for the media service.
///
/// The cached token sits behind an async mutex so concurrent first use
/// performs a single token exchange.
pub struct TokenProvider {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    resource: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(http: Client, config: &ServiceConfig) -> Self {
        let token_url = format!(
            "{}/{}/oauth2/token",
            config.authority_url.trim_end_matches('/'),
            config.tenant_domain
        );

        Self {
            http,
            token_url,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            resource: config.resource.clone(),
            cached: Mutex::new(None),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    /// Current bearer token, exchanging credentials when none is cached or
    /// the cached one is about to expire.
    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(token.value.clone());
            }
            debug!("Access token expires soon, refreshing");
        }

        let token = self.request_token().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Drop the cached token so the next call exchanges credentials again.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn request_token(&self) -> Result<CachedToken> {
        debug!("Requesting access token from {}", self.token_url);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("resource", self.resource.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| MediaError::Auth(format!("Token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = parse_error_payload(&body)
                .map(|(_, message)| message)
                .unwrap_or_else(|| format!("token endpoint returned HTTP {}", status));
            return Err(MediaError::Auth(message));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| MediaError::Auth(format!("Failed to parse token response: {}", e)))?;

        if let Some(kind) = token.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                return Err(MediaError::Auth(format!("Unsupported token type '{}'", kind)));
            }
        }

        let lifetime = token.expires_in.as_duration()?;
        info!("Acquired access token (valid for {}s)", lifetime.as_secs());

        Ok(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + lifetime,
        })
    }
}
