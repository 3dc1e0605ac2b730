use crate::error::{ConnectError, SendError};
use crate::types::{ChatId, InboundMessage, MessageHandle, OutboundMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique channel identifier: "loopback", "telegram".
    fn channel_id(&self) -> &str;

    /// Establish the transport session. Called once before `start`.
    async fn connect(&self) -> Result<(), ConnectError>;

    /// Start receiving messages. Push to tx for each inbound event.
    async fn start(&self, tx: mpsc::Sender<InboundMessage>) -> Result<(), ConnectError>;

    /// Send a message to a chat on this platform.
    async fn send(&self, chat_id: &ChatId, message: OutboundMessage)
    -> Result<MessageHandle, SendError>;

    /// Signal a "composing" indicator. Best-effort; callers must treat
    /// failures as non-fatal.
    async fn send_typing(&self, _chat_id: &ChatId) -> Result<(), SendError> {
        Err(SendError::Unsupported)
    }

    /// Attach an emoji reaction to a message. Best-effort.
    async fn send_reaction(
        &self,
        _chat_id: &ChatId,
        _message_id: i64,
        _emoji: &str,
    ) -> Result<(), SendError> {
        Err(SendError::Unsupported)
    }

    fn supports_typing_events(&self) -> bool {
        false
    }

    fn supports_reactions(&self) -> bool {
        false
    }
}
