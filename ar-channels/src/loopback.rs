use crate::error::{ConnectError, SendError};
use crate::traits::ChannelAdapter;
use crate::types::{ChatId, InboundMessage, MessageHandle, OutboundMessage};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tokio::sync::mpsc;

/// In-process adapter for dev mode and tests.
///
/// Inbound events are injected with [`LoopbackAdapter::inject`]; every
/// outbound side effect (send, typing, reaction) is recorded and can be
/// inspected afterwards. `set_fail_sends` and `set_fail_reactions` turn
/// the corresponding calls into failing remote calls for error-path
/// tests.
pub struct LoopbackAdapter {
    inbound_tx: tokio::sync::RwLock<Option<mpsc::Sender<InboundMessage>>>,
    sent: Mutex<Vec<(ChatId, OutboundMessage)>>,
    typing: Mutex<Vec<ChatId>>,
    reactions: Mutex<Vec<(ChatId, i64, String)>>,
    fail_sends: AtomicBool,
    fail_reactions: AtomicBool,
    next_handle: AtomicI64,
}

impl LoopbackAdapter {
    pub fn new() -> Self {
        Self {
            inbound_tx: tokio::sync::RwLock::new(None),
            sent: Mutex::new(Vec::new()),
            typing: Mutex::new(Vec::new()),
            reactions: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            fail_reactions: AtomicBool::new(false),
            next_handle: AtomicI64::new(1),
        }
    }

    /// Feed one inbound event into the running pipeline.
    pub async fn inject(&self, message: InboundMessage) -> Result<(), SendError> {
        let tx = self.inbound_tx.read().await.clone();
        let Some(tx) = tx else {
            return Err(SendError::NotConnected);
        };
        tx.send(message)
            .await
            .map_err(|_| SendError::NotConnected)
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reactions(&self, fail: bool) {
        self.fail_reactions.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(ChatId, OutboundMessage)> {
        lock(&self.sent).clone()
    }

    pub fn typing_events(&self) -> Vec<ChatId> {
        lock(&self.typing).clone()
    }

    pub fn reactions(&self) -> Vec<(ChatId, i64, String)> {
        lock(&self.reactions).clone()
    }
}

impl Default for LoopbackAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ChannelAdapter for LoopbackAdapter {
    fn channel_id(&self) -> &str {
        "loopback"
    }

    async fn connect(&self) -> Result<(), ConnectError> {
        Ok(())
    }

    async fn start(&self, tx: mpsc::Sender<InboundMessage>) -> Result<(), ConnectError> {
        *self.inbound_tx.write().await = Some(tx);
        tracing::info!(channel = self.channel_id(), "channel started");
        Ok(())
    }

    async fn send(
        &self,
        chat_id: &ChatId,
        message: OutboundMessage,
    ) -> Result<MessageHandle, SendError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SendError::Transport("loopback send disabled".to_string()));
        }
        tracing::debug!(chat = %chat_id, "loopback send");
        lock(&self.sent).push((chat_id.clone(), message));
        Ok(MessageHandle(self.next_handle.fetch_add(1, Ordering::SeqCst)))
    }

    async fn send_typing(&self, chat_id: &ChatId) -> Result<(), SendError> {
        lock(&self.typing).push(chat_id.clone());
        Ok(())
    }

    async fn send_reaction(
        &self,
        chat_id: &ChatId,
        message_id: i64,
        emoji: &str,
    ) -> Result<(), SendError> {
        if self.fail_reactions.load(Ordering::SeqCst) {
            return Err(SendError::Transport(
                "loopback reactions disabled".to_string(),
            ));
        }
        lock(&self.reactions)
            .push((chat_id.clone(), message_id, emoji.to_string()));
        Ok(())
    }

    fn supports_typing_events(&self) -> bool {
        true
    }

    fn supports_reactions(&self) -> bool {
        true
    }
}
