//! Global sliding-window rate limiter with exponential backoff.
//!
//! A rejection at the ceiling escalates into a timed block: the wait
//! until the oldest action leaves the window, multiplied by the backoff
//! factor, capped at the maximum block duration.

use crate::clock::Clock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Hard ceiling; configured limits above this are clamped.
pub const HARD_MAX_PER_MINUTE: u32 = 100;

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub max_per_minute: u32,
    pub backoff_multiplier: f64,
    pub max_block: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_per_minute: 50,
            backoff_multiplier: 1.5,
            max_block: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LimiterSnapshot {
    pub limit: u32,
    pub actions_in_window: usize,
    pub blocked_for_ms: u64,
    pub total_actions: u64,
    pub blocked_actions: u64,
}

struct LimiterState {
    limit: u32,
    timestamps: VecDeque<Instant>,
    blocked_until: Option<Instant>,
    total_actions: u64,
    blocked_actions: u64,
}

pub struct RateLimiter {
    state: Mutex<LimiterState>,
    backoff_multiplier: f64,
    max_block: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let mut limit = config.max_per_minute;
        if limit > HARD_MAX_PER_MINUTE {
            tracing::warn!(
                requested = limit,
                clamped_to = HARD_MAX_PER_MINUTE,
                "rate limit exceeds safe maximum; clamping"
            );
            limit = HARD_MAX_PER_MINUTE;
        }
        Self {
            state: Mutex::new(LimiterState {
                limit,
                timestamps: VecDeque::new(),
                blocked_until: None,
                total_actions: 0,
                blocked_actions: 0,
            }),
            backoff_multiplier: config.backoff_multiplier,
            max_block: config.max_block,
            clock,
        }
    }

    /// Gate one action. Records the action timestamp when allowed.
    pub fn can_perform_action(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();

        if let Some(until) = state.blocked_until {
            if now < until {
                state.blocked_actions += 1;
                return false;
            }
            state.blocked_until = None;
        }

        prune(&mut state.timestamps, now);

        if state.timestamps.len() as u32 >= state.limit {
            let block = match state.timestamps.front() {
                Some(&oldest) => {
                    let base = WINDOW.saturating_sub(now.duration_since(oldest));
                    base.mul_f64(self.backoff_multiplier).min(self.max_block)
                }
                None => self.max_block,
            };
            state.blocked_until = Some(now + block);
            state.blocked_actions += 1;
            tracing::warn!(
                actions_in_window = state.timestamps.len(),
                limit = state.limit,
                blocked_for_ms = block.as_millis() as u64,
                "rate limit exceeded; blocking"
            );
            return false;
        }

        state.timestamps.push_back(now);
        state.total_actions += 1;
        true
    }

    /// Time until the next action could be accepted. Zero when an
    /// action would be accepted right now. Read-only apart from the
    /// idempotent window pruning.
    pub fn wait_time(&self) -> Duration {
        let now = self.clock.now();
        let mut state = self.lock();

        if let Some(until) = state.blocked_until {
            if now < until {
                return until.duration_since(now);
            }
        }

        prune(&mut state.timestamps, now);

        if state.timestamps.len() as u32 >= state.limit {
            if let Some(&oldest) = state.timestamps.front() {
                return WINDOW.saturating_sub(now.duration_since(oldest));
            }
        }
        Duration::ZERO
    }

    /// Change the ceiling at runtime. Rejects zero and values over the
    /// hard cap; the in-flight window is not recalculated.
    pub fn update_limit(&self, new_limit: u32) -> bool {
        if new_limit == 0 || new_limit > HARD_MAX_PER_MINUTE {
            tracing::warn!(requested = new_limit, "rejected rate limit update");
            return false;
        }
        let mut state = self.lock();
        let old = state.limit;
        state.limit = new_limit;
        tracing::info!(old_limit = old, new_limit, "rate limit updated");
        true
    }

    pub fn reset(&self) {
        let mut state = self.lock();
        state.timestamps.clear();
        state.blocked_until = None;
        tracing::info!("rate limiter reset");
    }

    pub fn snapshot(&self) -> LimiterSnapshot {
        let now = self.clock.now();
        let mut state = self.lock();
        prune(&mut state.timestamps, now);
        let blocked_for = state
            .blocked_until
            .filter(|&until| until > now)
            .map(|until| until.duration_since(now))
            .unwrap_or(Duration::ZERO);
        LimiterSnapshot {
            limit: state.limit,
            actions_in_window: state.timestamps.len(),
            blocked_for_ms: blocked_for.as_millis() as u64,
            total_actions: state.total_actions,
            blocked_actions: state.blocked_actions,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LimiterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn prune(timestamps: &mut VecDeque<Instant>, now: Instant) {
    let Some(cutoff) = now.checked_sub(WINDOW) else {
        return;
    };
    while let Some(&front) = timestamps.front() {
        if front > cutoff {
            break;
        }
        timestamps.pop_front();
    }
}
