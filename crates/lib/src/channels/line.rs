//! LINE channel: webhook payload parsing and the Messaging API reply call.

use crate::channels::inbound::{InboundMessage, ReplyToken};
use crate::channels::reply::{ReplyError, ReplySender};
use async_trait::async_trait;
use serde::Deserialize;

const LINE_API_BASE: &str = "https://api.line.me";

/// Longest text LINE accepts in one text message, in characters.
pub const MAX_TEXT_CHARS: usize = 5000;

/// Webhook POST body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub message: Option<EventMessage>,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub webhook_event_id: Option<String>,
    #[serde(default)]
    pub delivery_context: Option<DeliveryContext>,
}

#[derive(Debug, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryContext {
    #[serde(default)]
    pub is_redelivery: bool,
}

impl WebhookPayload {
    /// Parse a webhook body. Call only after the signature has been verified.
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Text message events that carry a reply token. Other events (follow, postback,
    /// stickers, images) are dropped.
    pub fn into_text_messages(self) -> Vec<InboundMessage> {
        self.events
            .into_iter()
            .filter_map(|event| {
                if event.event_type != "message" {
                    log::debug!("line: ignoring {} event", event.event_type);
                    return None;
                }
                let message = event.message?;
                if message.message_type != "text" {
                    log::debug!("line: ignoring {} message", message.message_type);
                    return None;
                }
                let text = message.text?;
                let reply_token = event.reply_token.filter(|t| !t.is_empty())?;
                Some(InboundMessage {
                    reply_token: ReplyToken::new(reply_token),
                    text,
                    user_id: event.source.and_then(|s| s.user_id),
                    webhook_event_id: event.webhook_event_id,
                    redelivery: event
                        .delivery_context
                        .map(|d| d.is_redelivery)
                        .unwrap_or(false),
                })
            })
            .collect()
    }
}

/// Cut `text` to at most `MAX_TEXT_CHARS` characters.
pub fn truncate_text(text: &str) -> &str {
    match text.char_indices().nth(MAX_TEXT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Messaging API client for the reply endpoint.
#[derive(Clone)]
pub struct LineClient {
    base_url: String,
    access_token: String,
    client: reqwest::Client,
}

impl LineClient {
    pub fn new(access_token: String, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| LINE_API_BASE.to_string());
        Self {
            base_url,
            access_token,
            client: reqwest::Client::new(),
        }
    }

    /// POST /v2/bot/message/reply with a single text message.
    pub async fn reply_text(&self, token: ReplyToken, text: &str) -> Result<(), ReplyError> {
        let url = format!("{}/v2/bot/message/reply", self.base_url);
        let body = serde_json::json!({
            "replyToken": token.as_str(),
            "messages": [{ "type": "text", "text": truncate_text(text) }],
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ReplyError::Api { status, body });
        }
        Ok(())
    }
}

#[async_trait]
impl ReplySender for LineClient {
    async fn reply(&self, token: ReplyToken, text: &str) -> Result<(), ReplyError> {
        self.reply_text(token, text).await
    }
}
