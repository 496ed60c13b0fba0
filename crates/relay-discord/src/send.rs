use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relay_delivery::{ChannelSession, ChunkSink, DeliveryError};
use serenity::builder::{CreateAllowedMentions, CreateMessage};
use serenity::http::Http;
use serenity::model::id::{ChannelId, MessageId};
use tracing::{debug, warn};

/// Delivers one turn's chunks to a Discord channel.
///
/// Each chunk replies to the previous chunk (initially the triggering
/// message) only when something else was posted in the channel since;
/// otherwise it is a plain send so an uninterrupted reply reads as one block.
/// Mentions are never pinged.
pub struct DiscordSink {
    http: Arc<Http>,
    channel_id: ChannelId,
    session: Arc<ChannelSession>,
    last_associated: AtomicU64,
}

impl DiscordSink {
    pub fn new(http: Arc<Http>, channel_id: ChannelId, trigger: MessageId, session: Arc<ChannelSession>) -> Self {
        Self {
            http,
            channel_id,
            session,
            last_associated: AtomicU64::new(trigger.get()),
        }
    }
}

/// The message to reply to, if any: the last associated message when it is
/// no longer the newest one in the channel.
pub fn reply_target(latest_in_channel: u64, last_associated: u64) -> Option<u64> {
    (latest_in_channel != last_associated && last_associated != 0).then_some(last_associated)
}

#[async_trait]
impl ChunkSink for DiscordSink {
    async fn send_chunk(&self, content: &str) -> Result<String, DeliveryError> {
        let anchor = self.last_associated.load(Ordering::Acquire);
        let mut builder = CreateMessage::new()
            .content(content)
            .allowed_mentions(CreateAllowedMentions::new().replied_user(false));
        if let Some(target) = reply_target(self.session.latest_message(), anchor) {
            builder = builder.reference_message((self.channel_id, MessageId::new(target)));
        }

        let sent = self
            .channel_id
            .send_message(&self.http, builder)
            .await
            .map_err(|e| {
                warn!(channel = %self.channel_id, error = %e, "discord send failed");
                DeliveryError::SendFailed(e.to_string())
            })?;

        self.session.observe_message(sent.id.get());
        self.last_associated.store(sent.id.get(), Ordering::Release);
        debug!(channel = %self.channel_id, message_id = %sent.id, len = content.len(), "chunk sent");
        Ok(sent.id.to_string())
    }

    async fn notify_typing(&self) {
        if let Err(e) = self.channel_id.broadcast_typing(&self.http).await {
            debug!(channel = %self.channel_id, error = %e, "typing indicator failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_send_when_nothing_intervened() {
        assert_eq!(reply_target(500, 500), None);
    }

    #[test]
    fn reply_when_channel_moved_on() {
        assert_eq!(reply_target(510, 500), Some(500));
    }

    #[test]
    fn no_reply_without_anchor() {
        assert_eq!(reply_target(510, 0), None);
    }
}
