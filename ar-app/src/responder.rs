//! Message queue and responder orchestrator.
//!
//! Inbound messages are serialized through a FIFO queue with a single
//! consumer. Each message gets its own lifecycle machine and walks the
//! validation, decision, typing, respond, reaction and cooldown stages
//! in order; the next message never starts before the previous one
//! reaches a terminal state, cooldown included.

use crate::clock::Clock;
use crate::commands::AdminCommand;
use crate::config::{AppConfig, PacingConfig};
use crate::decorate::{BorderStyle, Decorator};
use crate::flood::FloodGuard;
use crate::lifecycle::{LifecycleMachine, LifecycleState, Transition};
use crate::matcher::ReplyMatcher;
use crate::rate_limit::{LimiterSnapshot, RateLimiter};
use crate::rng::RngHandle;
use crate::store::{ReplyStore, SettingsStore};
use ar_channels::{ChannelAdapter, ChatId, ChatKind, InboundMessage, OutboundMessage, SenderId};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// FIFO inbound queue. tokio's mpsc cannot report depth or be drained
/// by the admin surface, so this is a mutex-guarded deque with a
/// `Notify` wakeup for the single consumer.
pub struct MessageQueue {
    inner: Mutex<VecDeque<InboundMessage>>,
    notify: Notify,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, message: InboundMessage) {
        self.lock().push_back(message);
        self.notify.notify_one();
    }

    pub async fn pop(&self) -> InboundMessage {
        loop {
            let notified = self.notify.notified();
            if let Some(message) = self.lock().pop_front() {
                return message;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let drained = inner.len();
        inner.clear();
        drained
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<InboundMessage>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Default)]
struct PipelineCounters {
    received: AtomicU64,
    processed: AtomicU64,
    responded: AtomicU64,
    silenced: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub received: u64,
    pub processed: u64,
    pub responded: u64,
    pub silenced: u64,
    pub errors: u64,
    pub queue_length: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub pipeline: PipelineStats,
    pub limiter: LimiterSnapshot,
    pub reply_patterns: usize,
    pub cached_lookups: usize,
    pub tracked_senders: usize,
    pub muted_senders: usize,
    pub lifecycle_state: LifecycleState,
    pub lifecycle_transitions: u64,
}

#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub owner_id: Option<SenderId>,
    pub max_message_len: usize,
    pub pacing: PacingConfig,
}

impl ResponderConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        let owner = config.general.owner_id.trim();
        Self {
            owner_id: (!owner.is_empty()).then(|| SenderId::from(owner)),
            max_message_len: config.behavior.max_message_len,
            pacing: config.pacing.clone(),
        }
    }
}

enum Verdict {
    Proceed(String),
    Silence(&'static str),
}

// Chats that go quiet for this long lose their duplicate-id record;
// the map is only swept once it is large enough to matter.
const ADMITTED_RETENTION: Duration = Duration::from_secs(3600);
const ADMITTED_SWEEP_MIN: usize = 1024;

struct AdmittedId {
    id: i64,
    at: Instant,
}

pub struct Responder {
    adapter: Arc<dyn ChannelAdapter>,
    matcher: Arc<ReplyMatcher>,
    limiter: Arc<RateLimiter>,
    flood: Arc<FloodGuard>,
    settings: Arc<SettingsStore>,
    store: Arc<ReplyStore>,
    reactions: Vec<String>,
    config: ResponderConfig,
    rng: RngHandle,
    clock: Arc<dyn Clock>,
    queue: MessageQueue,
    counters: PipelineCounters,
    // Highest admitted message id per chat; only updated for messages
    // that pass validation, swept once stale and numerous.
    last_admitted: DashMap<ChatId, AdmittedId>,
    // Machine for the message currently in flight, kept for status.
    machine: RwLock<Arc<LifecycleMachine>>,
}

impl Responder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: Arc<dyn ChannelAdapter>,
        matcher: Arc<ReplyMatcher>,
        limiter: Arc<RateLimiter>,
        flood: Arc<FloodGuard>,
        settings: Arc<SettingsStore>,
        store: Arc<ReplyStore>,
        reactions: Vec<String>,
        config: ResponderConfig,
        rng: RngHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            adapter,
            matcher,
            limiter,
            flood,
            settings,
            store,
            reactions,
            config,
            rng,
            clock,
            queue: MessageQueue::new(),
            counters: PipelineCounters::default(),
            last_admitted: DashMap::new(),
            machine: RwLock::new(Arc::new(LifecycleMachine::new())),
        }
    }

    pub fn enqueue(&self, message: InboundMessage) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.queue.push(message);
    }

    /// Single-consumer processing loop. On cancellation the in-flight
    /// message finishes before the loop returns.
    pub async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = self.queue.pop() => message,
            };
            self.process_message(message).await;
        }
        tracing::info!("responder loop stopped");
    }

    async fn process_message(&self, message: InboundMessage) {
        if self.is_admin_command(&message) {
            self.handle_admin_command(message).await;
            self.counters.processed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let machine = Arc::new(LifecycleMachine::new());
        *self.write_machine() = machine.clone();

        machine.advance(LifecycleState::MessageDetected);
        machine.advance(LifecycleState::Validation);

        let reply = match self.validate_and_decide(&machine, &message) {
            Verdict::Proceed(reply) => reply,
            Verdict::Silence(reason) => {
                machine.advance(LifecycleState::Silent);
                self.counters.silenced.fetch_add(1, Ordering::Relaxed);
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    chat = %message.chat_id,
                    message_id = message.message_id,
                    reason,
                    "message silenced"
                );
                return;
            }
        };

        machine.advance(LifecycleState::Typing);
        self.simulate_typing(&message.chat_id).await;

        machine.advance(LifecycleState::Respond);
        let text = self.decorate(&reply);
        let outbound = OutboundMessage {
            text,
            reply_to_message_id: Some(message.message_id),
        };
        match self.adapter.send(&message.chat_id, outbound).await {
            Ok(handle) => {
                self.counters.responded.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    chat = %message.chat_id,
                    message_id = message.message_id,
                    sent = handle.0,
                    "reply sent"
                );
            }
            Err(e) => {
                machine.advance(LifecycleState::Error);
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    chat = %message.chat_id,
                    message_id = message.message_id,
                    error = %e,
                    "reply send failed"
                );
                return;
            }
        }

        self.maybe_react(&machine, &message).await;

        machine.advance(LifecycleState::Cooldown);
        let cooldown = self
            .rng
            .delay_ms(self.config.pacing.cooldown_min_ms, self.config.pacing.cooldown_max_ms);
        if cooldown > 0 {
            tokio::time::sleep(Duration::from_millis(cooldown)).await;
        }
        machine.advance(LifecycleState::Idle);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn validate_and_decide(
        &self,
        machine: &LifecycleMachine,
        message: &InboundMessage,
    ) -> Verdict {
        if message.text.trim().is_empty() {
            return Verdict::Silence("empty text");
        }
        if message.from_automation || message.outbound_echo {
            return Verdict::Silence("automation or own echo");
        }
        if !self.flood.can_sender_send(&message.sender_id) {
            return Verdict::Silence("sender muted");
        }
        if !self.limiter.can_perform_action() {
            return Verdict::Silence("rate limited");
        }
        let last = self
            .last_admitted
            .get(&message.chat_id)
            .map(|entry| entry.id);
        if last.is_some_and(|last| message.message_id <= last) {
            return Verdict::Silence("stale or duplicate message id");
        }
        if message.text.chars().count() > self.config.max_message_len {
            return Verdict::Silence("over-length text");
        }
        if !self.chat_kind_allowed(message.chat_kind) {
            return Verdict::Silence("chat kind not allowed");
        }

        self.last_admitted.insert(
            message.chat_id.clone(),
            AdmittedId {
                id: message.message_id,
                at: self.clock.now(),
            },
        );
        self.sweep_admitted();

        machine.advance(LifecycleState::Decision);
        match self.matcher.find_reply(&message.text) {
            Some(reply) => Verdict::Proceed(reply),
            None => Verdict::Silence("no matching reply"),
        }
    }

    fn sweep_admitted(&self) {
        if self.last_admitted.len() <= ADMITTED_SWEEP_MIN {
            return;
        }
        let Some(cutoff) = self.clock.now().checked_sub(ADMITTED_RETENTION) else {
            return;
        };
        let before = self.last_admitted.len();
        self.last_admitted.retain(|_, record| record.at > cutoff);
        tracing::debug!(
            before,
            after = self.last_admitted.len(),
            "swept stale duplicate-id records"
        );
    }

    fn chat_kind_allowed(&self, kind: ChatKind) -> bool {
        match kind {
            ChatKind::Direct => true,
            ChatKind::Group => self.settings.get_bool("behavior.reply_in_groups", false),
            ChatKind::Channel => self.settings.get_bool("behavior.reply_in_channels", false),
        }
    }

    async fn simulate_typing(&self, chat_id: &ChatId) {
        let delay = self
            .rng
            .delay_ms(self.config.pacing.typing_min_ms, self.config.pacing.typing_max_ms);
        if self.adapter.supports_typing_events() {
            if let Err(e) = self.adapter.send_typing(chat_id).await {
                tracing::debug!(chat = %chat_id, error = %e, "typing indicator failed");
            }
        }
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    async fn maybe_react(&self, machine: &LifecycleMachine, message: &InboundMessage) {
        if self.reactions.is_empty()
            || !self.adapter.supports_reactions()
            || !self.settings.get_bool("behavior.auto_react", true)
        {
            return;
        }
        if !self.rng.chance(self.config.pacing.reaction_chance) {
            return;
        }
        if !self.limiter.can_perform_action() {
            return;
        }
        let Some(emoji) = self.rng.pick(&self.reactions).cloned() else {
            return;
        };
        machine.advance(LifecycleState::Reaction);
        if let Err(e) = self
            .adapter
            .send_reaction(&message.chat_id, message.message_id, &emoji)
            .await
        {
            tracing::debug!(
                chat = %message.chat_id,
                message_id = message.message_id,
                error = %e,
                "reaction failed"
            );
        }
    }

    fn decorate(&self, text: &str) -> String {
        let style = if self.settings.get_bool("behavior.use_borders", true) {
            BorderStyle::Rounded
        } else {
            BorderStyle::None
        };
        Decorator::new(style).decorate(text)
    }

    fn is_admin_command(&self, message: &InboundMessage) -> bool {
        self.config
            .owner_id
            .as_ref()
            .is_some_and(|owner| owner == &message.sender_id)
            && message.text.starts_with('/')
    }

    async fn handle_admin_command(&self, message: InboundMessage) {
        let response = match AdminCommand::parse(&message.text) {
            Some(command) => command.execute(self).await,
            None => "Unknown command. Send /help for the command list.".to_string(),
        };
        let outbound = OutboundMessage {
            text: response,
            reply_to_message_id: Some(message.message_id),
        };
        if let Err(e) = self.adapter.send(&message.chat_id, outbound).await {
            tracing::error!(chat = %message.chat_id, error = %e, "admin reply failed");
        }
    }

    // Operations shared by the admin surface, the CLI and the HTTP
    // status routes.

    pub async fn add_reply(&self, keyword: &str, response: &str) -> anyhow::Result<bool> {
        if !self.matcher.add_reply(keyword, response) {
            return Ok(false);
        }
        self.persist_replies().await?;
        Ok(true)
    }

    pub async fn remove_reply(
        &self,
        keyword: &str,
        response: Option<&str>,
    ) -> anyhow::Result<bool> {
        if !self.matcher.remove_reply(keyword, response) {
            return Ok(false);
        }
        self.persist_replies().await?;
        Ok(true)
    }

    async fn persist_replies(&self) -> anyhow::Result<()> {
        let entries = self.matcher.snapshot_entries();
        self.store.save_replies(&entries).await
    }

    /// Matcher dry run: no cache writes, no sends.
    pub fn test_response(&self, text: &str) -> Option<String> {
        self.matcher.peek_reply(text)
    }

    pub fn update_rate_limit(&self, limit: u32) -> bool {
        self.limiter.update_limit(limit)
    }

    pub fn reset_limiter(&self) {
        self.limiter.reset();
    }

    pub fn clear_queue(&self) -> usize {
        self.queue.clear()
    }

    pub fn reset_stats(&self) {
        self.counters.received.store(0, Ordering::Relaxed);
        self.counters.processed.store(0, Ordering::Relaxed);
        self.counters.responded.store(0, Ordering::Relaxed);
        self.counters.silenced.store(0, Ordering::Relaxed);
        self.counters.errors.store(0, Ordering::Relaxed);
    }

    pub fn unmute_sender(&self, sender: &SenderId) -> bool {
        self.flood.unmute(sender)
    }

    pub async fn reload_replies(&self) -> usize {
        let index = self.store.load_replies().await;
        let patterns = index.len();
        self.matcher.reload(index);
        patterns
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn flood_handle(&self) -> Arc<FloodGuard> {
        self.flood.clone()
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        PipelineStats {
            received: self.counters.received.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            responded: self.counters.responded.load(Ordering::Relaxed),
            silenced: self.counters.silenced.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            queue_length: self.queue.len(),
        }
    }

    pub fn stats(&self) -> StatsReport {
        let machine = self.read_machine();
        let matcher = self.matcher.stats();
        StatsReport {
            pipeline: self.pipeline_stats(),
            limiter: self.limiter.snapshot(),
            reply_patterns: matcher.patterns,
            cached_lookups: matcher.cache_entries,
            tracked_senders: self.flood.tracked_senders(),
            muted_senders: self.flood.muted_senders(),
            lifecycle_state: machine.current(),
            lifecycle_transitions: machine.transition_count(),
        }
    }

    pub fn current_state(&self) -> LifecycleState {
        self.read_machine().current()
    }

    pub fn lifecycle_history(&self) -> Vec<Transition> {
        self.read_machine().history()
    }

    fn read_machine(&self) -> Arc<LifecycleMachine> {
        self.machine
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn write_machine(&self) -> std::sync::RwLockWriteGuard<'_, Arc<LifecycleMachine>> {
        self.machine
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::flood::FloodGuardConfig;
    use crate::matcher::ReplyIndex;
    use crate::rate_limit::RateLimiterConfig;
    use crate::store::default_reactions;
    use ar_channels::LoopbackAdapter;
    use chrono::Utc;
    use serde_json::json;

    struct Harness {
        responder: Arc<Responder>,
        adapter: Arc<LoopbackAdapter>,
        clock: Arc<ManualClock>,
        cancel: CancellationToken,
    }

    impl Harness {
        async fn shutdown(self) {
            self.cancel.cancel();
        }
    }

    async fn harness_with(entries: &[(&str, &[&str])], owner: Option<&str>) -> Harness {
        harness_with_pacing(entries, owner, 0.0).await
    }

    async fn harness_with_pacing(
        entries: &[(&str, &[&str])],
        owner: Option<&str>,
        reaction_chance: f64,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new());
        let mut index = ReplyIndex::new();
        for (keyword, responses) in entries {
            for response in *responses {
                index.add(keyword, *response);
            }
        }
        let rng = RngHandle::seeded(1);
        let matcher = Arc::new(ReplyMatcher::new(
            index,
            Duration::from_secs(300),
            clock.clone(),
            rng.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default(), clock.clone()));
        let flood = Arc::new(FloodGuard::new(FloodGuardConfig::default(), clock.clone()));
        let data_dir =
            std::env::temp_dir().join(format!("autoreply-resp-{}", uuid::Uuid::new_v4()));
        let settings = Arc::new(SettingsStore::load(&data_dir).await);
        settings
            .set("behavior.use_borders", json!(false))
            .await
            .expect("settings");
        let store = Arc::new(ReplyStore::new(&data_dir));

        let adapter = Arc::new(LoopbackAdapter::new());
        let config = ResponderConfig {
            owner_id: owner.map(SenderId::from),
            max_message_len: 1000,
            pacing: PacingConfig {
                typing_min_ms: 0,
                typing_max_ms: 0,
                cooldown_min_ms: 0,
                cooldown_max_ms: 0,
                reaction_chance,
            },
        };
        let responder = Arc::new(Responder::new(
            adapter.clone(),
            matcher,
            limiter,
            flood,
            settings,
            store,
            default_reactions(),
            config,
            rng,
            clock.clone(),
        ));

        let cancel = CancellationToken::new();
        tokio::spawn(responder.clone().run_loop(cancel.clone()));

        Harness {
            responder,
            adapter,
            clock,
            cancel,
        }
    }

    fn inbound(id: i64, sender: &str, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: id,
            chat_id: ChatId::from("chat-1"),
            sender_id: SenderId::from(sender),
            chat_kind: ChatKind::Direct,
            text: text.to_string(),
            from_automation: false,
            outbound_echo: false,
            received_at: Utc::now(),
        }
    }

    async fn wait_until(responder: &Responder, processed: u64) {
        for _ in 0..400 {
            if responder.pipeline_stats().processed >= processed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "pipeline stalled: {:?}",
            responder.pipeline_stats()
        );
    }

    #[tokio::test]
    async fn matching_message_gets_a_reply() {
        let h = harness_with(&[("hi", &["Hello!"])], None).await;
        h.responder.enqueue(inbound(1, "sender-1", "Hi"));
        wait_until(&h.responder, 1).await;

        let sent = h.adapter.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.text, "Hello!");
        assert_eq!(sent[0].1.reply_to_message_id, Some(1));
        assert_eq!(h.responder.current_state(), LifecycleState::Idle);
        assert_eq!(h.responder.pipeline_stats().responded, 1);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn unmatched_message_is_silenced() {
        let h = harness_with(&[("hi", &["Hello!"])], None).await;
        h.responder.enqueue(inbound(1, "sender-1", "xyz123"));
        wait_until(&h.responder, 1).await;

        assert!(h.adapter.sent().is_empty());
        assert_eq!(h.responder.current_state(), LifecycleState::Silent);
        assert_eq!(h.responder.pipeline_stats().silenced, 1);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected_even_with_a_match() {
        let h = harness_with(&[("hi", &["Hello!"])], None).await;
        h.responder.enqueue(inbound(5, "sender-1", "hi"));
        h.responder.enqueue(inbound(5, "sender-1", "hi"));
        h.responder.enqueue(inbound(4, "sender-1", "hi"));
        wait_until(&h.responder, 3).await;

        assert_eq!(h.adapter.sent().len(), 1);
        assert_eq!(h.responder.pipeline_stats().silenced, 2);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_guard_is_scoped_per_chat() {
        let h = harness_with(&[("hi", &["Hello!"])], None).await;
        let mut other = inbound(5, "sender-2", "hi");
        other.chat_id = ChatId::from("chat-2");
        h.responder.enqueue(inbound(5, "sender-1", "hi"));
        h.responder.enqueue(other);
        wait_until(&h.responder, 2).await;

        assert_eq!(h.adapter.sent().len(), 2);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn automation_echo_and_empty_messages_are_silenced() {
        let h = harness_with(&[("hi", &["Hello!"])], None).await;
        let mut bot = inbound(1, "sender-1", "hi");
        bot.from_automation = true;
        let mut echo = inbound(2, "sender-1", "hi");
        echo.outbound_echo = true;
        h.responder.enqueue(bot);
        h.responder.enqueue(echo);
        h.responder.enqueue(inbound(3, "sender-1", "   "));
        wait_until(&h.responder, 3).await;

        assert!(h.adapter.sent().is_empty());
        assert_eq!(h.responder.pipeline_stats().silenced, 3);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn over_length_text_is_silenced() {
        let h = harness_with(&[("hi", &["Hello!"])], None).await;
        let long = format!("hi {}", "x".repeat(1100));
        h.responder.enqueue(inbound(1, "sender-1", &long));
        wait_until(&h.responder, 1).await;

        assert!(h.adapter.sent().is_empty());
        h.shutdown().await;
    }

    #[tokio::test]
    async fn group_chats_are_silent_until_opted_in() {
        let h = harness_with(&[("hi", &["Hello!"])], None).await;
        // Untouched settings: direct messages only.
        let mut group = inbound(1, "sender-1", "hi");
        group.chat_kind = ChatKind::Group;
        h.responder.enqueue(group);
        wait_until(&h.responder, 1).await;
        assert!(h.adapter.sent().is_empty());
        assert_eq!(h.responder.pipeline_stats().silenced, 1);

        h.responder
            .settings()
            .set("behavior.reply_in_groups", json!(true))
            .await
            .expect("settings");
        let mut group = inbound(2, "sender-1", "hi");
        group.chat_kind = ChatKind::Group;
        h.responder.enqueue(group);
        wait_until(&h.responder, 2).await;
        assert_eq!(h.adapter.sent().len(), 1);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn flooding_sender_is_muted_but_others_still_served() {
        let h = harness_with(&[("hi", &["Hello!"])], None).await;
        for i in 0..8 {
            h.responder.enqueue(inbound(i + 1, "noisy", "hi"));
        }
        h.responder.enqueue(inbound(100, "quiet", "hi"));
        wait_until(&h.responder, 9).await;

        // 7 replies for the noisy sender, the 8th silenced, 1 for quiet.
        assert_eq!(h.adapter.sent().len(), 8);
        assert_eq!(h.responder.pipeline_stats().silenced, 1);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn transport_failure_errors_that_message_only() {
        let h = harness_with(&[("hi", &["Hello!"])], None).await;
        h.adapter.set_fail_sends(true);
        h.responder.enqueue(inbound(1, "sender-1", "hi"));
        wait_until(&h.responder, 1).await;
        assert_eq!(h.responder.current_state(), LifecycleState::Error);
        assert_eq!(h.responder.pipeline_stats().errors, 1);

        h.adapter.set_fail_sends(false);
        h.responder.enqueue(inbound(2, "sender-1", "hi"));
        wait_until(&h.responder, 2).await;
        assert_eq!(h.adapter.sent().len(), 1);
        assert_eq!(h.responder.current_state(), LifecycleState::Idle);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn reaction_and_typing_indicator_follow_a_reply() {
        let h = harness_with_pacing(&[("hi", &["Hello!"])], None, 1.0).await;
        h.responder.enqueue(inbound(1, "sender-1", "hi"));
        wait_until(&h.responder, 1).await;

        assert_eq!(h.adapter.sent().len(), 1);
        let reactions = h.adapter.reactions();
        assert_eq!(reactions.len(), 1);
        assert_eq!(reactions[0].1, 1);
        assert!(!h.adapter.typing_events().is_empty());
        assert_eq!(h.responder.current_state(), LifecycleState::Idle);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn reaction_failure_does_not_undo_the_reply() {
        let h = harness_with_pacing(&[("hi", &["Hello!"])], None, 1.0).await;
        h.adapter.set_fail_reactions(true);
        h.responder.enqueue(inbound(1, "sender-1", "hi"));
        wait_until(&h.responder, 1).await;

        assert_eq!(h.adapter.sent().len(), 1);
        assert!(h.adapter.reactions().is_empty());
        let stats = h.responder.pipeline_stats();
        assert_eq!(stats.responded, 1);
        assert_eq!(stats.errors, 0);
        assert_eq!(h.responder.current_state(), LifecycleState::Idle);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn stale_duplicate_id_records_are_swept() {
        let h = harness_with(&[("hi", &["Hello!"])], None).await;
        for i in 0..(ADMITTED_SWEEP_MIN + 200) {
            h.responder.last_admitted.insert(
                ChatId::from(format!("dormant-{i}")),
                AdmittedId {
                    id: 1,
                    at: h.clock.now(),
                },
            );
        }
        h.clock.advance(ADMITTED_RETENTION * 2);
        h.responder.enqueue(inbound(1, "sender-1", "hi"));
        wait_until(&h.responder, 1).await;

        assert_eq!(h.responder.last_admitted.len(), 1);
        assert!(
            h.responder
                .last_admitted
                .contains_key(&ChatId::from("chat-1"))
        );
        h.shutdown().await;
    }

    #[tokio::test]
    async fn borders_wrap_replies_when_enabled() {
        let h = harness_with(&[("hi", &["Hello!"])], None).await;
        h.responder
            .settings()
            .set("behavior.use_borders", json!(true))
            .await
            .expect("settings");
        h.responder.enqueue(inbound(1, "sender-1", "hi"));
        wait_until(&h.responder, 1).await;

        let sent = h.adapter.sent();
        assert!(sent[0].1.text.contains("Hello!"));
        assert!(sent[0].1.text.starts_with('╭'));
        h.shutdown().await;
    }

    #[tokio::test]
    async fn owner_slash_messages_are_admin_commands() {
        let h = harness_with(&[("hi", &["Hello!"])], Some("owner-1")).await;
        h.responder.enqueue(inbound(1, "owner-1", "/help"));
        wait_until(&h.responder, 1).await;

        let sent = h.adapter.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.text.contains("/addreply"));
        // Admin traffic counts as processed, keeping received and
        // processed in step.
        let stats = h.responder.pipeline_stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.processed, 1);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn non_owner_slash_messages_go_through_the_pipeline() {
        let h = harness_with(&[("hi", &["Hello!"])], Some("owner-1")).await;
        h.responder.enqueue(inbound(1, "stranger", "/help"));
        wait_until(&h.responder, 1).await;

        assert!(h.adapter.sent().is_empty());
        assert_eq!(h.responder.pipeline_stats().silenced, 1);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn add_reply_persists_and_takes_effect() {
        let h = harness_with(&[], None).await;
        assert!(h
            .responder
            .add_reply("ping", "pong")
            .await
            .expect("add"));
        h.responder.enqueue(inbound(1, "sender-1", "ping"));
        wait_until(&h.responder, 1).await;
        assert_eq!(h.adapter.sent()[0].1.text, "pong");

        // Persisted to disk, so a reload keeps it.
        assert_eq!(h.responder.reload_replies().await, 1);
        assert_eq!(h.responder.test_response("ping"), Some("pong".to_string()));
        h.shutdown().await;
    }

    #[tokio::test]
    async fn queue_clear_and_stats_reset() {
        let h = harness_with(&[("hi", &["Hello!"])], None).await;
        h.responder.enqueue(inbound(1, "sender-1", "hi"));
        wait_until(&h.responder, 1).await;
        assert!(h.responder.pipeline_stats().received > 0);

        h.responder.reset_stats();
        let stats = h.responder.pipeline_stats();
        assert_eq!(stats.received, 0);
        assert_eq!(stats.responded, 0);
        assert_eq!(h.responder.clear_queue(), 0);
        h.shutdown().await;
    }

    #[tokio::test]
    async fn rate_limited_messages_are_silenced() {
        let clock = Arc::new(ManualClock::new());
        let mut index = ReplyIndex::new();
        index.add("hi", "Hello!");
        let rng = RngHandle::seeded(1);
        let matcher = Arc::new(ReplyMatcher::new(
            index,
            Duration::from_secs(300),
            clock.clone(),
            rng.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(
            RateLimiterConfig {
                max_per_minute: 2,
                ..RateLimiterConfig::default()
            },
            clock.clone(),
        ));
        let flood = Arc::new(FloodGuard::new(FloodGuardConfig::default(), clock.clone()));
        let data_dir =
            std::env::temp_dir().join(format!("autoreply-resp-{}", uuid::Uuid::new_v4()));
        let settings = Arc::new(SettingsStore::load(&data_dir).await);
        settings
            .set("behavior.use_borders", json!(false))
            .await
            .expect("settings");
        let adapter = Arc::new(LoopbackAdapter::new());
        let responder = Arc::new(Responder::new(
            adapter.clone(),
            matcher,
            limiter,
            flood,
            settings,
            Arc::new(ReplyStore::new(&data_dir)),
            vec![],
            ResponderConfig {
                owner_id: None,
                max_message_len: 1000,
                pacing: PacingConfig {
                    typing_min_ms: 0,
                    typing_max_ms: 0,
                    cooldown_min_ms: 0,
                    cooldown_max_ms: 0,
                    reaction_chance: 0.0,
                },
            },
            rng,
            clock.clone(),
        ));
        let cancel = CancellationToken::new();
        tokio::spawn(responder.clone().run_loop(cancel.clone()));

        for i in 0..3 {
            responder.enqueue(inbound(i + 1, "sender-1", "hi"));
        }
        wait_until(&responder, 3).await;

        assert_eq!(adapter.sent().len(), 2);
        assert_eq!(responder.pipeline_stats().silenced, 1);
        cancel.cancel();
    }
}
