//! Bot Connector access tokens via the OAuth client credentials grant.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use log::debug;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::Credentials;

const SCOPE: &str = "https://api.botframework.com/.default";
const REFRESH_MARGIN: Duration = Duration::from_secs(300);
/// Upper bound on how long a token is cached, whatever the endpoint claims.
const MAX_LIFETIME_SECS: u64 = 86_400;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + REFRESH_MARGIN < self.expires_at
    }
}

/// Fetches and caches the bearer token used for outbound connector calls.
pub struct TokenProvider {
    client: reqwest::Client,
    credentials: Credentials,
    token_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn new(client: reqwest::Client, credentials: Credentials, login_url: &str) -> Self {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            login_url.trim_end_matches('/'),
            credentials.tenant_id
        );
        Self {
            client,
            credentials,
            token_url,
            cached: Mutex::new(None),
        }
    }

    /// Returns a token with at least five minutes of lifetime left, fetching a
    /// new one when the cached token is missing or about to expire.
    pub async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        debug!("Requesting connector token from {}", self.token_url);
        let res = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.credentials.client_id.as_str()),
                ("client_secret", self.credentials.client_secret.as_str()),
                ("scope", SCOPE),
            ])
            .send()
            .await
            .context("token request failed")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("token endpoint returned {}: {}", status, body);
        }

        let body: TokenResponse = res.json().await.context("invalid token response")?;
        let lifetime = Duration::from_secs(body.expires_in.min(MAX_LIFETIME_SECS));
        let token = CachedToken {
            value: body.access_token,
            expires_at: Instant::now()
                .checked_add(lifetime)
                .context("token lifetime out of range")?,
        };
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }
}
