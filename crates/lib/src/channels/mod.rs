//! Messaging channel (LINE).
//!
//! Webhook payload types, the single-use reply token, and the reply-send seam used by the
//! dispatcher. Inbound messages are produced by the gateway after signature verification.

mod inbound;
mod line;
mod reply;

pub use inbound::{InboundMessage, ReplyToken};
pub use line::{truncate_text, LineClient, WebhookEvent, WebhookPayload, MAX_TEXT_CHARS};
pub use reply::{ReplyError, ReplySender};
