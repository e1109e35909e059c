use log::{info, warn};

use teams_echo_bot::config::Config;
use teams_echo_bot::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    pretty_env_logger::init_timed();

    let config = Config::from_env()?;

    if config.is_development() {
        info!("Running in DEVELOPMENT mode (permissive CORS)");
    } else {
        info!("Running in PRODUCTION mode");
    }
    info!("Bot mode: {}", config.mode.as_str());
    if config.credentials.is_none() {
        warn!("CLIENT_ID/CLIENT_SECRET not set; webhook calls and replies are unauthenticated");
    }

    server::run(config).await
}
