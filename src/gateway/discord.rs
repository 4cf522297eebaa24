//! Discord gateway — polls the REST API for channel messages.
//!
//! Uses `GET /channels/{id}/messages?after={snowflake}` with a cursor
//! that advances past every message seen, so each message is delivered
//! once per process. The cursor is seeded from the newest message at
//! startup; history from before the bot came up is not replayed.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::error::GatewayError;
use crate::gateway::{
    Attachment, Gateway, InboundMessage, MessageStream, OutboundMessage,
};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Discord gateway — connects to the REST API with a bot token.
pub struct DiscordGateway {
    bot_token: SecretString,
    watch_channel: String,
    poll_interval: Duration,
    api_base: String,
    client: reqwest::Client,
}

impl DiscordGateway {
    pub fn new(bot_token: SecretString, watch_channel: String, poll_interval: Duration) -> Self {
        Self {
            bot_token,
            watch_channel,
            poll_interval,
            api_base: DISCORD_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token.expose_secret())
    }

    /// Post a message to a channel, optionally with image embeds and a
    /// reply reference.
    async fn post_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<(), GatewayError> {
        let mut body = serde_json::json!({ "content": message.content });

        if !message.attachment_urls.is_empty() {
            let embeds: Vec<serde_json::Value> = message
                .attachment_urls
                .iter()
                .map(|url| serde_json::json!({ "image": { "url": url } }))
                .collect();
            body["embeds"] = serde_json::Value::Array(embeds);
        }

        if let Some(ref reply_to) = message.reply_to {
            body["message_reference"] = serde_json::json!({ "message_id": reply_to });
        }

        let resp = self
            .client
            .post(self.api_url(&format!("/channels/{channel_id}/messages")))
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::SendFailed {
                name: "discord".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(GatewayError::SendFailed {
                name: "discord".into(),
                reason: format!("create message returned {status}: {err}"),
            });
        }

        Ok(())
    }

    /// Newest message id in the watch channel, used to seed the cursor.
    async fn latest_message_id(&self) -> Result<Option<String>, GatewayError> {
        let resp = self
            .client
            .get(self.api_url(&format!(
                "/channels/{}/messages?limit=1",
                self.watch_channel
            )))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(GatewayError::StartupFailed {
                name: "discord".into(),
                reason: format!("message history returned {}", resp.status()),
            });
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::InvalidMessage(e.to_string()))?;

        Ok(data
            .as_array()
            .and_then(|msgs| msgs.first())
            .and_then(|m| m.get("id"))
            .and_then(serde_json::Value::as_str)
            .map(String::from))
    }
}

#[async_trait]
impl Gateway for DiscordGateway {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&self) -> Result<MessageStream, GatewayError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut cursor = self.latest_message_id().await?;

        let auth = self.auth_header();
        let poll_url_base = self.api_url(&format!("/channels/{}/messages", self.watch_channel));
        let poll_interval = self.poll_interval;
        let client = self.client.clone();

        tokio::spawn(async move {
            tracing::info!("Discord gateway listening for messages...");

            loop {
                tokio::time::sleep(poll_interval).await;

                let url = match cursor {
                    Some(ref after) => format!("{poll_url_base}?after={after}&limit=100"),
                    None => format!("{poll_url_base}?limit=100"),
                };

                let resp = match client
                    .get(&url)
                    .header("Authorization", &auth)
                    .send()
                    .await
                {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Discord poll error: {e}");
                        continue;
                    }
                };

                if !resp.status().is_success() {
                    tracing::warn!(status = ?resp.status(), "Discord poll returned error status");
                    continue;
                }

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Discord parse error: {e}");
                        continue;
                    }
                };

                let Some(raw_messages) = data.as_array() else {
                    tracing::warn!("Discord poll returned non-array payload");
                    continue;
                };

                // The API returns newest first; deliver oldest first.
                let mut messages: Vec<InboundMessage> =
                    raw_messages.iter().filter_map(parse_message).collect();
                messages.sort_by_key(|m| snowflake(&m.id));

                for message in messages {
                    if snowflake(&message.id)
                        > cursor.as_deref().map(snowflake).unwrap_or(0)
                    {
                        cursor = Some(message.id.clone());
                    }
                    if tx.send(message).is_err() {
                        tracing::info!("Discord listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send(&self, channel_id: &str, message: OutboundMessage) -> Result<(), GatewayError> {
        self.post_message(channel_id, &message).await?;
        tracing::info!("Discord message sent to {channel_id}");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), GatewayError> {
        let resp = self
            .client
            .get(self.api_url("/users/@me"))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| GatewayError::StartupFailed {
                name: "discord".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(GatewayError::StartupFailed {
                name: "discord".into(),
                reason: format!("/users/@me returned {}", resp.status()),
            })
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Parse a message object from the channel-messages payload. Returns
/// None for objects missing the fields every real message carries.
fn parse_message(value: &serde_json::Value) -> Option<InboundMessage> {
    let id = value.get("id").and_then(serde_json::Value::as_str)?;
    let channel_id = value.get("channel_id").and_then(serde_json::Value::as_str)?;

    let author_is_bot = value
        .get("author")
        .and_then(|a| a.get("bot"))
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    let content = value
        .get("content")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();

    let attachments = value
        .get("attachments")
        .and_then(serde_json::Value::as_array)
        .map(|atts| {
            atts.iter()
                .filter_map(|a| a.get("url").and_then(serde_json::Value::as_str))
                .map(|url| Attachment { url: url.to_string() })
                .collect()
        })
        .unwrap_or_default();

    let reference = value
        .get("message_reference")
        .and_then(|r| r.get("message_id"))
        .and_then(serde_json::Value::as_str)
        .map(String::from);

    Some(InboundMessage {
        id: id.to_string(),
        channel_id: channel_id.to_string(),
        author_is_bot,
        content: content.to_string(),
        attachments,
        reference,
    })
}

/// Numeric value of a snowflake id, for ordering. Unparseable ids sort
/// first and never advance the cursor.
fn snowflake(id: &str) -> u64 {
    id.parse().unwrap_or(0)
}
