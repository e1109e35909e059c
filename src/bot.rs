//! Message handling: the handler seam and the echo handler.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::activity::Activity;
use crate::connector::Connector;

/// One inbound activity plus the means to answer it.
pub struct ActivityContext {
    pub activity: Activity,
    connector: Arc<dyn Connector>,
}

impl ActivityContext {
    pub fn new(activity: Activity, connector: Arc<dyn Connector>) -> Self {
        Self {
            activity,
            connector,
        }
    }

    /// Replies to the inbound activity with a plain text message.
    pub async fn reply(&self, text: impl Into<String>) -> Result<()> {
        self.connector.send(&self.activity.reply(text)).await
    }

    /// Shows the typing indicator in the conversation.
    pub async fn typing(&self) -> Result<()> {
        self.connector.send(&self.activity.typing()).await
    }
}

/// Handles inbound message activities.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, ctx: &ActivityContext) -> Result<()>;
}

/// Replies with exactly the text it received.
pub struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn on_message(&self, ctx: &ActivityContext) -> Result<()> {
        ctx.reply(ctx.activity.text()).await
    }
}
