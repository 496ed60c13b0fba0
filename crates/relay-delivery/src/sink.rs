use async_trait::async_trait;

use crate::error::DeliveryError;

/// Outbound side of a channel, as seen by the delivery scheduler.
///
/// One sink serves exactly one turn; implementations may keep per-turn state
/// such as the message to reply to next.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Deliver `content` verbatim as one message and return its platform id.
    async fn send_chunk(&self, content: &str) -> Result<String, DeliveryError>;

    /// Fire-and-forget presence signal ("bot is typing").
    async fn notify_typing(&self);
}
