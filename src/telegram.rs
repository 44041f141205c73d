use crate::config::Config;
use crate::dispatcher::{ChatType, InboundEvent, OutboundReply, ReplySink};
use crate::settings::UserId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

// Telegram webhook types
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub username: Option<String>,
    pub first_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub r#type: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to_message_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

/// `group` and `supergroup` are both group contexts.
fn chat_type(raw: &str) -> Option<ChatType> {
    match raw {
        "group" | "supergroup" => Some(ChatType::Group),
        "private" => Some(ChatType::Private),
        "channel" => Some(ChatType::Channel),
        _ => None,
    }
}

/// Map a webhook update to the dispatcher's event shape.
///
/// Updates without a message, sender or text, and channel posts, yield `None`.
pub fn to_inbound_event(update: &Update) -> Option<InboundEvent> {
    let message = update.message.as_ref()?;
    let sender = message.from.as_ref()?;
    let text = message.text.as_ref()?;

    let chat_type = chat_type(&message.chat.r#type)?;
    if chat_type == ChatType::Channel {
        return None;
    }

    Some(InboundEvent {
        chat_id: message.chat.id,
        sender_id: UserId(sender.id),
        message_id: message.message_id,
        text: text.clone(),
        chat_type,
    })
}

pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.telegram_api_url, &config.telegram_bot_token)
    }

    /// Send plain text, optionally as a reply to `reply_to_message_id`.
    pub async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        reply_to_message_id: Option<i64>,
    ) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.token);

        let request = SendMessageRequest {
            chat_id,
            text,
            reply_to_message_id,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send Telegram message")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error ({}): {}", status, body);
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .context("Failed to parse Telegram API response")?;
        if !api_response.ok {
            anyhow::bail!(
                "Telegram API rejected message: {}",
                api_response.description.unwrap_or_default()
            );
        }

        debug!("Message sent to chat {}", chat_id);
        Ok(())
    }
}

#[async_trait]
impl ReplySink for TelegramClient {
    async fn send_reply(&self, reply: &OutboundReply) -> Result<()> {
        self.send_text(reply.chat_id, &reply.body_text, Some(reply.reply_to_message_id))
            .await
    }
}
