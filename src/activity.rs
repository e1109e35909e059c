//! Bot Framework activity wire types.
//!
//! Only the fields the bot reads or writes are modelled; anything else in the
//! inbound JSON is ignored on deserialization.

use serde::{Deserialize, Serialize};

pub const MESSAGE: &str = "message";
pub const TYPING: &str = "typing";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aad_object_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// A single Bot Framework activity, inbound or outbound.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub service_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub from: ChannelAccount,
    pub conversation: ConversationAccount,
    #[serde(default)]
    pub recipient: ChannelAccount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

impl Activity {
    pub fn is_message(&self) -> bool {
        self.kind.eq_ignore_ascii_case(MESSAGE)
    }

    /// Inbound text, with a missing field read as the empty string.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Display name of the sender, empty when the channel omits it.
    pub fn sender_name(&self) -> &str {
        self.from.name.as_deref().unwrap_or("")
    }

    /// Builds a message activity answering `self`: same conversation, sender
    /// and recipient swapped, `replyToId` pointing at the inbound activity.
    pub fn reply(&self, text: impl Into<String>) -> Activity {
        Activity {
            kind: MESSAGE.to_string(),
            text: Some(text.into()),
            text_format: Some("plain".to_string()),
            ..self.addressed_reply()
        }
    }

    /// Builds a typing indicator addressed like a reply.
    pub fn typing(&self) -> Activity {
        Activity {
            kind: TYPING.to_string(),
            ..self.addressed_reply()
        }
    }

    fn addressed_reply(&self) -> Activity {
        Activity {
            kind: String::new(),
            id: Some(uuid::Uuid::new_v4().to_string()),
            timestamp: None,
            service_url: self.service_url.clone(),
            channel_id: self.channel_id.clone(),
            from: self.recipient.clone(),
            conversation: self.conversation.clone(),
            recipient: self.from.clone(),
            text: None,
            text_format: None,
            locale: self.locale.clone(),
            reply_to_id: self.id.clone(),
        }
    }
}
