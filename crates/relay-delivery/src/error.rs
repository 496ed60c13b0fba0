/// Errors produced while delivering chunks to a channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    /// The platform rejected or failed to deliver a message.
    #[error("Send failed: {0}")]
    SendFailed(String),
}
