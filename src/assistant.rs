//! LLM-backed message handler with per-conversation history.
//!
//! The handler forwards each message, together with the recent turns of the
//! same conversation, to a chat completion model and replies with its answer.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::bot::{ActivityContext, MessageHandler};
use crate::config::AzureOpenAiConfig;

/// How many stored turns are replayed to the model.
pub const HISTORY_WINDOW: usize = 5;
/// Conversations kept in memory; the least recently active one is dropped
/// beyond this.
pub const MAX_CONVERSATIONS: usize = 10_000;
pub const EMPTY_RESPONSE_REPLY: &str = "I'm sorry, I couldn't generate a response.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// A chat completion backend. Returns the answer text, possibly empty.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, instructions: &str, input: &str) -> Result<String>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Azure OpenAI chat completions for a single deployment.
pub struct AzureOpenAiModel {
    client: reqwest::Client,
    config: AzureOpenAiConfig,
}

impl AzureOpenAiModel {
    pub fn new(client: reqwest::Client, config: AzureOpenAiConfig) -> Self {
        Self { client, config }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.endpoint, self.config.deployment, self.config.api_version
        )
    }
}

#[async_trait]
impl ChatModel for AzureOpenAiModel {
    async fn complete(&self, instructions: &str, input: &str) -> Result<String> {
        let body = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: instructions,
                },
                ChatMessage {
                    role: "user",
                    content: input,
                },
            ],
        };

        let res = self
            .client
            .post(self.url())
            .header("api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            bail!("chat completion returned {}: {}", status, body);
        }

        let parsed: ChatResponse = res.json().await.context("invalid chat completion response")?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

/// Renders the model input: recent history (if any) followed by the request.
pub fn contextual_input(history: &[Turn], user_name: &str, text: &str) -> String {
    let prefix = if user_name.is_empty() {
        "User".to_string()
    } else {
        format!("User ({})", user_name)
    };

    if history.is_empty() {
        return format!("{} request: {}", prefix, text);
    }

    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let summary = history[start..]
        .iter()
        .map(|turn| match turn.role {
            Role::User => format!("User: {}", turn.content),
            Role::Assistant => format!("Assistant: {}", turn.content),
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Conversation history:\n{}\n\n{} request: {}",
        summary, prefix, text
    )
}

/// Base instructions plus a note naming the current user, when known.
pub fn instructions_for(base: &str, user_name: &str) -> String {
    if user_name.is_empty() {
        return base.to_string();
    }
    format!(
        "{}\n\n## CURRENT USER CONTEXT\nThe person making this request is: {}. \
Use this name for tools that require userName or sender parameters.",
        base, user_name
    )
}

struct Conversation {
    turns: Vec<Turn>,
    last_active: u64,
}

/// Per-conversation turns, bounded in both turns and conversations.
#[derive(Default)]
struct Conversations {
    by_id: HashMap<String, Conversation>,
    clock: u64,
}

impl Conversations {
    fn record(&mut self, conversation_id: &str, exchange: [Turn; 2], max_conversations: usize) {
        self.clock += 1;
        let clock = self.clock;
        let conversation = self
            .by_id
            .entry(conversation_id.to_string())
            .or_insert_with(|| Conversation {
                turns: Vec::new(),
                last_active: clock,
            });
        conversation.last_active = clock;
        conversation.turns.extend(exchange);
        let excess = conversation.turns.len().saturating_sub(HISTORY_WINDOW);
        conversation.turns.drain(..excess);

        while self.by_id.len() > max_conversations {
            let oldest = self
                .by_id
                .iter()
                .min_by_key(|(_, c)| c.last_active)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    self.by_id.remove(&id);
                }
                None => break,
            }
        }
    }
}

pub struct AssistantHandler {
    model: Arc<dyn ChatModel>,
    instructions: String,
    max_conversations: usize,
    history: Mutex<Conversations>,
}

impl AssistantHandler {
    pub fn new(model: Arc<dyn ChatModel>, instructions: impl Into<String>) -> Self {
        Self {
            model,
            instructions: instructions.into(),
            max_conversations: MAX_CONVERSATIONS,
            history: Mutex::new(Conversations::default()),
        }
    }

    pub fn with_max_conversations(mut self, max: usize) -> Self {
        self.max_conversations = max.max(1);
        self
    }

    /// Stored turns for a conversation, oldest first.
    pub async fn history(&self, conversation_id: &str) -> Vec<Turn> {
        self.history
            .lock()
            .await
            .by_id
            .get(conversation_id)
            .map(|c| c.turns.clone())
            .unwrap_or_default()
    }

    async fn answer(&self, ctx: &ActivityContext) -> Result<()> {
        let activity = &ctx.activity;
        let text = activity.text();
        let user_name = activity.sender_name();
        let conversation_id = activity.conversation.id.as_str();

        let input = contextual_input(&self.history(conversation_id).await, user_name, text);
        let instructions = instructions_for(&self.instructions, user_name);
        debug!("Assistant input for {}: {}", conversation_id, input);

        let answer = self.model.complete(&instructions, &input).await?;
        if answer.is_empty() {
            return ctx.reply(EMPTY_RESPONSE_REPLY).await;
        }

        self.history.lock().await.record(
            conversation_id,
            [
                Turn {
                    role: Role::User,
                    content: text.to_string(),
                },
                Turn {
                    role: Role::Assistant,
                    content: answer.clone(),
                },
            ],
            self.max_conversations,
        );

        ctx.reply(answer).await
    }
}

#[async_trait]
impl MessageHandler for AssistantHandler {
    async fn on_message(&self, ctx: &ActivityContext) -> Result<()> {
        ctx.typing().await?;

        if let Err(e) = self.answer(ctx).await {
            error!("Assistant failed: {:#}", e);
            ctx.reply(format!("Sorry, I encountered an error: {}", e)).await?;
        }
        Ok(())
    }
}
