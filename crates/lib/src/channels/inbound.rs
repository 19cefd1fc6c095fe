//! Inbound message from the webhook: delivered to the dispatcher for a reply.

use std::fmt;

/// Single-use credential issued by LINE for replying to one event.
///
/// Not `Clone`: sending a reply consumes the token, so a second send for the same event
/// does not type-check.
pub struct ReplyToken(String);

impl ReplyToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(6).collect();
        format!("{}…", prefix)
    }
}

impl fmt::Debug for ReplyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReplyToken").field(&self.redacted()).finish()
    }
}

/// A verified text message awaiting a reply.
#[derive(Debug)]
pub struct InboundMessage {
    pub reply_token: ReplyToken,
    pub text: String,
    /// Sender's user id, when the source exposes one.
    pub user_id: Option<String>,
    pub webhook_event_id: Option<String>,
    /// True when LINE re-sent an event it could not confirm as delivered.
    pub redelivery: bool,
}
