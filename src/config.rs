//! Environment-driven configuration.
//!
//! Values come from the process environment; `main` loads a `.env` file first
//! when one is present.

use anyhow::{bail, Context, Result};

pub const DEFAULT_PORT: u16 = 3978;
pub const DEFAULT_TENANT: &str = "botframework.com";
pub const DEFAULT_LOGIN_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_OPENID_METADATA_URL: &str =
    "https://login.botframework.com/v1/.well-known/openidconfiguration";
/// Hosts (and their subdomains) that may receive the connector token.
pub const DEFAULT_TRUSTED_SERVICE_HOSTS: &[&str] = &[
    "botframework.com",
    "botframework.us",
    "botframework.azure.us",
    "smba.trafficmanager.net",
];
pub const DEFAULT_INSTRUCTIONS: &str = "You are a friendly and efficient assistant in Microsoft Teams. \
Use only plain text without emojis. Be concise and action-oriented.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()) {
            Some(v) if v == "development" => Environment::Development,
            _ => Environment::Production,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotMode {
    Echo,
    Assistant,
}

impl BotMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotMode::Echo => "echo",
            BotMode::Assistant => "assistant",
        }
    }

    fn parse(value: Option<&str>) -> Result<Self> {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            None | Some("echo") => Ok(BotMode::Echo),
            Some("assistant") => Ok(BotMode::Assistant),
            Some(other) => bail!("unknown BOT_MODE {:?} (expected \"echo\" or \"assistant\")", other),
        }
    }
}

/// App registration used to obtain Bot Connector tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub tenant_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzureOpenAiConfig {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: Environment,
    pub mode: BotMode,
    pub credentials: Option<Credentials>,
    pub login_url: String,
    pub openid_metadata_url: String,
    pub trusted_service_hosts: Vec<String>,
    pub instructions: String,
    pub azure_openai: Option<AzureOpenAiConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(p) => p
                .trim()
                .parse()
                .with_context(|| format!("invalid PORT {:?}", p))?,
            None => DEFAULT_PORT,
        };

        let environment = Environment::parse(get("ENVIRONMENT").as_deref());
        let mode = BotMode::parse(get("BOT_MODE").as_deref())?;

        let credentials = match (get("CLIENT_ID"), get("CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(Credentials {
                client_id,
                client_secret,
                tenant_id: get("TENANT_ID").unwrap_or_else(|| DEFAULT_TENANT.to_string()),
            }),
            (None, None) => None,
            _ => bail!("CLIENT_ID and CLIENT_SECRET must be set together"),
        };

        let azure_openai = match mode {
            BotMode::Echo => None,
            BotMode::Assistant => {
                let require = |key: &str| {
                    get(key).with_context(|| format!("{} is required when BOT_MODE=assistant", key))
                };
                Some(AzureOpenAiConfig {
                    endpoint: require("AZURE_OPENAI_ENDPOINT")?
                        .trim_end_matches('/')
                        .to_string(),
                    api_key: require("AZURE_OPENAI_API_KEY")?,
                    deployment: require("AZURE_OPENAI_DEPLOYMENT")?,
                    api_version: require("AZURE_OPENAI_API_VERSION")?,
                })
            }
        };

        Ok(Self {
            port,
            environment,
            mode,
            credentials,
            login_url: get("LOGIN_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string()),
            openid_metadata_url: get("OPENID_METADATA_URL")
                .unwrap_or_else(|| DEFAULT_OPENID_METADATA_URL.to_string()),
            trusted_service_hosts: match get("TRUSTED_SERVICE_HOSTS") {
                Some(hosts) => hosts
                    .split(',')
                    .map(|h| h.trim().to_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect(),
                None => DEFAULT_TRUSTED_SERVICE_HOSTS
                    .iter()
                    .map(|h| h.to_string())
                    .collect(),
            },
            instructions: get("BOT_INSTRUCTIONS").unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
            azure_openai,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }
}
