//! Inbound authentication of Bot Framework webhook calls.
//!
//! The Bot Connector signs every call with an RS256 JWT. Signing keys come
//! from the JWKS advertised in the Bot Framework OpenID metadata and are
//! cached for a day, or refetched early when a token names an unknown key.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use log::{debug, warn};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::handlers::AppState;

pub const BOT_FRAMEWORK_ISSUER: &str = "https://api.botframework.com";
const KEY_REFRESH: Duration = Duration::from_secs(24 * 60 * 60);
const CLOCK_SKEW_SECS: u64 = 300;

/// Claims the webhook needs from a validated token.
#[derive(Debug, Clone, Deserialize)]
pub struct BotClaims {
    #[serde(default)]
    pub serviceurl: Option<String>,
}

impl BotClaims {
    /// True when the token was issued for the activity's `serviceUrl`.
    pub fn allows_service_url(&self, service_url: &str) -> bool {
        let normalize = |u: &str| u.trim_end_matches('/').to_lowercase();
        self.serviceurl
            .as_deref()
            .is_some_and(|claimed| normalize(claimed) == normalize(service_url))
    }
}

#[derive(Deserialize)]
struct OpenIdMetadata {
    jwks_uri: String,
}

#[derive(Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

struct KeySet {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

pub struct JwtValidator {
    client: reqwest::Client,
    metadata_url: String,
    audience: String,
    keys: Mutex<Option<KeySet>>,
}

impl JwtValidator {
    pub fn new(
        client: reqwest::Client,
        metadata_url: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            client,
            metadata_url: metadata_url.into(),
            audience: audience.into(),
            keys: Mutex::new(None),
        }
    }

    /// Verifies signature, issuer, audience and expiry of a bearer token.
    pub async fn validate(&self, token: &str) -> Result<BotClaims> {
        let header = decode_header(token).context("malformed token")?;
        if header.alg != Algorithm::RS256 {
            bail!("unexpected token algorithm {:?}", header.alg);
        }
        let kid = header.kid.context("token has no key id")?;
        let key = self.key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[BOT_FRAMEWORK_ISSUER]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.leeway = CLOCK_SKEW_SECS;

        let data = decode::<BotClaims>(token, &key, &validation).context("token rejected")?;
        Ok(data.claims)
    }

    async fn key(&self, kid: &str) -> Result<DecodingKey> {
        let mut cached = self.keys.lock().await;
        if let Some(set) = cached.as_ref() {
            if set.fetched_at.elapsed() < KEY_REFRESH {
                if let Some(key) = set.keys.get(kid) {
                    return Ok(key.clone());
                }
            }
        }

        let set = KeySet {
            keys: self.fetch_keys().await?,
            fetched_at: Instant::now(),
        };
        let key = set.keys.get(kid).cloned();
        *cached = Some(set);
        key.with_context(|| format!("unknown signing key {:?}", kid))
    }

    async fn fetch_keys(&self) -> Result<HashMap<String, DecodingKey>> {
        debug!("Fetching OpenID metadata from {}", self.metadata_url);
        let metadata: OpenIdMetadata = self
            .client
            .get(&self.metadata_url)
            .send()
            .await
            .context("OpenID metadata request failed")?
            .error_for_status()?
            .json()
            .await
            .context("invalid OpenID metadata")?;

        let set: JwkSet = self
            .client
            .get(&metadata.jwks_uri)
            .send()
            .await
            .context("JWKS request failed")?
            .error_for_status()?
            .json()
            .await
            .context("invalid JWKS")?;

        let mut keys = HashMap::new();
        for jwk in set.keys {
            let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
                continue;
            };
            if jwk.kty != "RSA" {
                continue;
            }
            match DecodingKey::from_rsa_components(&n, &e) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(err) => warn!("Skipping unusable signing key {}: {}", kid, err),
            }
        }
        Ok(keys)
    }
}

/// Rejects webhook calls without a valid Bot Framework bearer token. The
/// validated claims are handed to the route through request extensions.
/// Passes everything through when no validator is configured.
pub async fn require_bot_token(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(validator) = &state.validator else {
        return Ok(next.run(req).await);
    };

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    match validator.validate(token).await {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        Err(e) => {
            warn!("Rejected webhook call: {:#}", e);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
