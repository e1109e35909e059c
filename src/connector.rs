//! Outbound delivery of activities to the Bot Connector service.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::Url;

use crate::activity::Activity;
use crate::token::TokenProvider;

/// The send primitive handlers reply through.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Delivers `activity` to the conversation it is addressed to.
    async fn send(&self, activity: &Activity) -> Result<()>;
}

/// Connector backed by the Bot Framework REST API.
///
/// Without a token provider requests go out unauthenticated, which is what the
/// local emulator expects. With one, only `trusted_hosts` (or their
/// subdomains) are ever contacted.
pub struct HttpConnector {
    client: reqwest::Client,
    tokens: Option<TokenProvider>,
    trusted_hosts: Vec<String>,
}

impl HttpConnector {
    pub fn new(
        client: reqwest::Client,
        tokens: Option<TokenProvider>,
        trusted_hosts: Vec<String>,
    ) -> Self {
        Self {
            client,
            tokens,
            trusted_hosts,
        }
    }

    fn is_trusted(&self, url: &Url) -> bool {
        let Some(host) = url.host_str().map(str::to_lowercase) else {
            return false;
        };
        self.trusted_hosts.iter().any(|trusted| {
            host == *trusted
                || host
                    .strip_suffix(trusted.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

/// `{serviceUrl}/v3/conversations/{id}/activities[/{replyToId}]`, each id
/// percent-encoded as a single path segment.
pub fn activity_url(activity: &Activity) -> Result<Url> {
    let mut url = Url::parse(&activity.service_url)
        .with_context(|| format!("invalid serviceUrl {:?}", activity.service_url))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| anyhow!("serviceUrl {:?} cannot be a base", activity.service_url))?;
        segments
            .pop_if_empty()
            .extend(["v3", "conversations", activity.conversation.id.as_str(), "activities"]);
        if let Some(reply_to) = &activity.reply_to_id {
            segments.push(reply_to);
        }
    }
    Ok(url)
}

#[async_trait]
impl Connector for HttpConnector {
    async fn send(&self, activity: &Activity) -> Result<()> {
        let url = activity_url(activity)?;
        debug!("Sending {} activity to {}", activity.kind, url);

        if self.tokens.is_some() && !self.is_trusted(&url) {
            bail!("refusing to send to untrusted serviceUrl {}", activity.service_url);
        }

        let mut req = self.client.post(url).json(activity);
        if let Some(tokens) = &self.tokens {
            req = req.bearer_auth(tokens.token().await?);
        }

        let res = req.send().await.context("connector request failed")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("connector returned {}: {}", status, body);
        }
        Ok(())
    }
}
