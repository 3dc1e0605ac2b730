//! Per-sender flood guard.
//!
//! Independent from the global rate limiter: a single noisy sender gets
//! muted without burning the shared action budget. Stale sender entries
//! are swept periodically so the map does not grow without bound.

use crate::clock::Clock;
use ar_channels::SenderId;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct FloodGuardConfig {
    pub window: Duration,
    pub max_per_window: u32,
    pub mute: Duration,
    pub sweep_interval: Duration,
}

impl Default for FloodGuardConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_per_window: 7,
            mute: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(300),
        }
    }
}

struct SenderRecord {
    timestamps: VecDeque<Instant>,
    muted_until: Option<Instant>,
}

pub struct FloodGuard {
    senders: DashMap<SenderId, SenderRecord>,
    config: FloodGuardConfig,
    clock: Arc<dyn Clock>,
}

impl FloodGuard {
    pub fn new(config: FloodGuardConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            senders: DashMap::new(),
            config,
            clock,
        }
    }

    /// Record one message from `sender` and decide whether it may be
    /// processed. Crossing the per-window ceiling mutes the sender.
    pub fn can_sender_send(&self, sender: &SenderId) -> bool {
        let now = self.clock.now();
        let mut record = self.senders.entry(sender.clone()).or_insert_with(|| SenderRecord {
            timestamps: VecDeque::new(),
            muted_until: None,
        });

        if let Some(until) = record.muted_until {
            if now < until {
                return false;
            }
            record.muted_until = None;
            record.timestamps.clear();
        }

        if let Some(cutoff) = now.checked_sub(self.config.window) {
            while let Some(&front) = record.timestamps.front() {
                if front > cutoff {
                    break;
                }
                record.timestamps.pop_front();
            }
        }

        record.timestamps.push_back(now);
        if record.timestamps.len() as u32 > self.config.max_per_window {
            record.muted_until = Some(now + self.config.mute);
            tracing::warn!(
                sender = %sender,
                messages_in_window = record.timestamps.len(),
                mute_secs = self.config.mute.as_secs(),
                "sender flooding; muted"
            );
            return false;
        }

        true
    }

    pub fn is_muted(&self, sender: &SenderId) -> bool {
        let now = self.clock.now();
        self.senders
            .get(sender)
            .and_then(|record| record.muted_until)
            .is_some_and(|until| now < until)
    }

    pub fn unmute(&self, sender: &SenderId) -> bool {
        match self.senders.get_mut(sender) {
            Some(mut record) if record.muted_until.is_some() => {
                record.muted_until = None;
                record.timestamps.clear();
                tracing::info!(sender = %sender, "sender unmuted");
                true
            }
            _ => false,
        }
    }

    pub fn tracked_senders(&self) -> usize {
        self.senders.len()
    }

    pub fn muted_senders(&self) -> usize {
        let now = self.clock.now();
        self.senders
            .iter()
            .filter(|record| {
                record
                    .muted_until
                    .is_some_and(|until| now < until)
            })
            .count()
    }

    /// Drop senders that are neither muted nor recently active.
    /// Retention is twice the mute duration.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let cutoff = now.checked_sub(self.config.mute * 2);
        let before = self.senders.len();
        self.senders.retain(|_, record| {
            if record.muted_until.is_some_and(|until| now < until) {
                return true;
            }
            match cutoff {
                Some(cutoff) => record.timestamps.iter().any(|&t| t > cutoff),
                None => !record.timestamps.is_empty(),
            }
        });
        let removed = before - self.senders.len();
        if removed > 0 {
            tracing::debug!(removed, "swept stale flood records");
        }
        removed
    }

    /// Periodic sweep loop; exits on cancellation.
    pub async fn run_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn guard() -> (FloodGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let guard = FloodGuard::new(FloodGuardConfig::default(), clock.clone());
        (guard, clock)
    }

    #[test]
    fn eighth_message_in_a_minute_mutes_the_sender() {
        let (guard, clock) = guard();
        let sender = SenderId::from("sender-1");
        for _ in 0..7 {
            assert!(guard.can_sender_send(&sender));
            clock.advance(Duration::from_secs(1));
        }
        assert!(!guard.can_sender_send(&sender));
        assert!(guard.is_muted(&sender));

        // Still muted a moment later; accepted once the mute expires.
        clock.advance(Duration::from_secs(30));
        assert!(!guard.can_sender_send(&sender));
        clock.advance(Duration::from_secs(31));
        assert!(guard.can_sender_send(&sender));
        assert!(!guard.is_muted(&sender));
    }

    #[test]
    fn senders_are_tracked_independently() {
        let (guard, _) = guard();
        let noisy = SenderId::from("noisy");
        let quiet = SenderId::from("quiet");
        for _ in 0..8 {
            guard.can_sender_send(&noisy);
        }
        assert!(guard.is_muted(&noisy));
        assert!(guard.can_sender_send(&quiet));
        assert!(!guard.is_muted(&quiet));
    }

    #[test]
    fn window_expiry_forgives_old_messages() {
        let (guard, clock) = guard();
        let sender = SenderId::from("sender-1");
        for _ in 0..7 {
            assert!(guard.can_sender_send(&sender));
        }
        clock.advance(Duration::from_secs(61));
        assert!(guard.can_sender_send(&sender));
        assert!(!guard.is_muted(&sender));
    }

    #[test]
    fn unmute_clears_the_mute_and_the_window() {
        let (guard, _) = guard();
        let sender = SenderId::from("sender-1");
        for _ in 0..8 {
            guard.can_sender_send(&sender);
        }
        assert!(guard.is_muted(&sender));
        assert!(guard.unmute(&sender));
        assert!(guard.can_sender_send(&sender));
        assert!(!guard.unmute(&sender));
    }

    #[test]
    fn sweep_drops_idle_senders_but_keeps_muted_ones() {
        let (guard, clock) = guard();
        let idle = SenderId::from("idle");
        let muted = SenderId::from("muted");
        assert!(guard.can_sender_send(&idle));
        for _ in 0..8 {
            guard.can_sender_send(&muted);
        }
        assert_eq!(guard.tracked_senders(), 2);

        // Within the retention horizon (twice the mute) nothing goes.
        clock.advance(Duration::from_secs(119));
        assert_eq!(guard.sweep(), 0);

        clock.advance(Duration::from_secs(2));
        // Mute was only 60s, so by now the muted sender is idle too.
        assert!(!guard.is_muted(&muted));
        assert_eq!(guard.sweep(), 2);
        assert_eq!(guard.tracked_senders(), 0);
    }

    #[test]
    fn sweep_keeps_actively_muted_senders() {
        let (guard, clock) = guard();
        let muted = SenderId::from("muted");
        for _ in 0..8 {
            guard.can_sender_send(&muted);
        }
        clock.advance(Duration::from_secs(30));
        assert_eq!(guard.sweep(), 0);
        assert_eq!(guard.muted_senders(), 1);
    }
}
