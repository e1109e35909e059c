use std::sync::Arc;

use axum::extract::State;
use axum::Extension;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use log::{debug, info, warn};

use crate::activity::Activity;
use crate::auth::{BotClaims, JwtValidator};
use crate::bot::{ActivityContext, MessageHandler};
use crate::config::BotMode;
use crate::connector::Connector;
use crate::error::AppError;
use crate::types::HealthResponse;

pub struct AppState {
    pub mode: BotMode,
    pub handler: Arc<dyn MessageHandler>,
    pub connector: Arc<dyn Connector>,
    /// Inbound token check; `None` accepts unauthenticated calls (emulator).
    pub validator: Option<Arc<JwtValidator>>,
}

/// Activity webhook. Message activities go to the handler; every other
/// activity type is acknowledged and dropped.
///
/// When the call was authenticated, the token must have been issued for the
/// activity's `serviceUrl`.
pub async fn messages(
    State(state): State<Arc<AppState>>,
    claims: Option<Extension<BotClaims>>,
    Json(activity): Json<Activity>,
) -> Result<impl IntoResponse, AppError> {
    if state.validator.is_some() {
        let allowed =
            claims.is_some_and(|Extension(c)| c.allows_service_url(&activity.service_url));
        if !allowed {
            warn!("Token not issued for serviceUrl {}", activity.service_url);
            return Ok(StatusCode::UNAUTHORIZED);
        }
    }

    if !activity.is_message() {
        debug!(
            "Ignoring {} activity in conversation {}",
            activity.kind, activity.conversation.id
        );
        return Ok(StatusCode::OK);
    }

    info!(
        "Message from {} in conversation {}",
        activity.from.id, activity.conversation.id
    );

    let ctx = ActivityContext::new(activity, state.connector.clone());
    state.handler.on_message(&ctx).await?;

    Ok(StatusCode::OK)
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        mode: state.mode.as_str().to_string(),
    })
}
