//! Outbound reply seam: the dispatcher sends through this trait so tests can record sends.

use crate::channels::inbound::ReplyToken;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ReplyError {
    #[error("reply request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("reply api error: {status} {body}")]
    Api { status: u16, body: String },
}

/// Sends one text reply addressed by a reply token.
#[async_trait]
pub trait ReplySender: Send + Sync {
    /// Deliver `text` for the event that issued `token`. The token is consumed.
    async fn reply(&self, token: ReplyToken, text: &str) -> Result<(), ReplyError>;
}
