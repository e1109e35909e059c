//! Router and shared state assembly.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use log::info;
use tower_http::cors::CorsLayer;

use crate::assistant::{AssistantHandler, AzureOpenAiModel};
use crate::auth::{self, JwtValidator};
use crate::bot::{EchoHandler, MessageHandler};
use crate::config::{BotMode, Config};
use crate::connector::HttpConnector;
use crate::handlers::{self, AppState};
use crate::token::TokenProvider;

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    info!(
        "{} {} -> {} ({} ms)",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

/// Wires the connector and the handler selected by `config.mode`.
pub fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    let client = reqwest::Client::new();

    let tokens = config
        .credentials
        .clone()
        .map(|creds| TokenProvider::new(client.clone(), creds, &config.login_url));
    let connector = Arc::new(HttpConnector::new(
        client.clone(),
        tokens,
        config.trusted_service_hosts.clone(),
    ));
    let validator = config.credentials.as_ref().map(|creds| {
        Arc::new(JwtValidator::new(
            client.clone(),
            config.openid_metadata_url.clone(),
            creds.client_id.clone(),
        ))
    });

    let handler: Arc<dyn MessageHandler> = match config.mode {
        BotMode::Echo => Arc::new(EchoHandler),
        BotMode::Assistant => {
            let azure = config
                .azure_openai
                .clone()
                .ok_or_else(|| anyhow::anyhow!("assistant mode requires Azure OpenAI settings"))?;
            let model = Arc::new(AzureOpenAiModel::new(client, azure));
            Arc::new(AssistantHandler::new(model, config.instructions.clone()))
        }
    };

    Ok(Arc::new(AppState {
        mode: config.mode,
        handler,
        connector,
        validator,
    }))
}

pub fn router(state: Arc<AppState>, development: bool) -> Router {
    let app = Router::new()
        .route("/api/messages", post(handlers::messages))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bot_token,
        ))
        .route("/api/health", get(handlers::health))
        .layer(middleware::from_fn(log_requests));

    let app = if development {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };

    app.with_state(state)
}

/// Binds `0.0.0.0:{port}` and serves until the process is stopped.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = build_state(&config)?;
    let app = router(state, config.is_development());

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
