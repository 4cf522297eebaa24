//! Gateway abstraction for chat-platform message I/O.
//!
//! The rest of the bot only sees [`Gateway`] — inbound messages arrive
//! as a stream, outbound messages go through [`Gateway::send`]. The
//! Discord transport lives in [`discord`]; tests substitute their own.

pub mod discord;

pub use discord::DiscordGateway;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::GatewayError;

/// A message received from the chat platform.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Platform-assigned message id, used as the pending-announcement key.
    pub id: String,
    pub channel_id: String,
    /// True when the author is a bot account (including this bot).
    pub author_is_bot: bool,
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// Id of the message this one replies to, if any.
    pub reference: Option<String>,
}

/// An attachment on an inbound message. The URL is treated as an opaque
/// handle and never fetched by the bot itself.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub url: String,
}

impl InboundMessage {
    /// First attachment URL, if the message carries one.
    pub fn first_attachment_url(&self) -> Option<&str> {
        self.attachments.first().map(|a| a.url.as_str())
    }
}

/// A message to send to the chat platform.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub content: String,
    /// Image URLs rendered alongside the text.
    pub attachment_urls: Vec<String>,
    /// Message id to reply to, if this is a threaded reply.
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachment_urls: Vec::new(),
            reply_to: None,
        }
    }

    pub fn with_attachment(mut self, url: impl Into<String>) -> Self {
        self.attachment_urls.push(url.into());
        self
    }

    pub fn in_reply_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }
}

/// Stream of inbound messages produced by a started gateway.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// A connection to a chat platform.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str;

    /// Begin receiving messages. Callable once per gateway.
    async fn start(&self) -> Result<MessageStream, GatewayError>;

    /// Send a message to a channel.
    async fn send(&self, channel_id: &str, message: OutboundMessage) -> Result<(), GatewayError>;

    /// Verify credentials and connectivity before starting.
    async fn health_check(&self) -> Result<(), GatewayError>;
}
