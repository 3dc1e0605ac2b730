//! Per-message lifecycle state machine.
//!
//! Each inbound message is driven through one machine instance; the
//! orchestrator starts a fresh machine for the next message, so
//! `Silent` and `Error` are dead ends rather than recoverable states.
//! A bounded transition history is kept for the status surfaces only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

const HISTORY_CAP: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    MessageDetected,
    Validation,
    Decision,
    Typing,
    Respond,
    Reaction,
    Cooldown,
    Silent,
    Error,
}

impl LifecycleState {
    /// False while mid-action or dead-ended.
    pub fn can_process(self) -> bool {
        !self.is_busy() && self != LifecycleState::Error
    }

    /// States that must not be interrupted mid-action.
    fn is_busy(self) -> bool {
        matches!(
            self,
            LifecycleState::Typing
                | LifecycleState::Respond
                | LifecycleState::Reaction
                | LifecycleState::Cooldown
        )
    }

    fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Silent | LifecycleState::Error)
    }

    fn designed_successors(self) -> &'static [LifecycleState] {
        use LifecycleState::*;
        match self {
            Idle => &[MessageDetected],
            MessageDetected => &[Validation],
            Validation => &[Decision, Silent],
            Decision => &[Typing, Silent],
            Typing => &[Respond],
            Respond => &[Reaction, Cooldown],
            Reaction => &[Cooldown],
            Cooldown => &[Idle],
            Silent => &[],
            Error => &[],
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::MessageDetected => "message_detected",
            LifecycleState::Validation => "validation",
            LifecycleState::Decision => "decision",
            LifecycleState::Typing => "typing",
            LifecycleState::Respond => "respond",
            LifecycleState::Reaction => "reaction",
            LifecycleState::Cooldown => "cooldown",
            LifecycleState::Silent => "silent",
            LifecycleState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub at: DateTime<Utc>,
}

struct MachineState {
    current: LifecycleState,
    history: VecDeque<Transition>,
    transitions: u64,
    rejected: u64,
}

pub struct LifecycleMachine {
    state: Mutex<MachineState>,
}

impl Default for LifecycleMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MachineState {
                current: LifecycleState::Idle,
                history: VecDeque::new(),
                transitions: 0,
                rejected: 0,
            }),
        }
    }

    pub fn current(&self) -> LifecycleState {
        self.lock().current
    }

    pub fn can_process(&self) -> bool {
        self.current().can_process()
    }

    /// Follow a designed pipeline edge. `Error` is reachable from any
    /// non-terminal state; every other move must be a listed successor.
    pub fn advance(&self, to: LifecycleState) -> bool {
        let mut state = self.lock();
        let from = state.current;
        let allowed = !from.is_terminal()
            && (to == LifecycleState::Error || from.designed_successors().contains(&to));
        if !allowed {
            state.rejected += 1;
            tracing::warn!(%from, %to, "rejected lifecycle transition");
            return false;
        }
        Self::commit(&mut state, from, to);
        true
    }

    /// Externally forced jump (abort/reset). From a busy state only
    /// `Error` and `Idle` are accepted; terminal states accept nothing.
    pub fn request(&self, to: LifecycleState) -> bool {
        let mut state = self.lock();
        let from = state.current;
        let allowed = if from.is_terminal() {
            false
        } else if from.is_busy() {
            matches!(to, LifecycleState::Error | LifecycleState::Idle)
        } else {
            matches!(to, LifecycleState::Error | LifecycleState::Idle)
                || from.designed_successors().contains(&to)
        };
        if !allowed {
            state.rejected += 1;
            tracing::warn!(%from, %to, "rejected lifecycle request");
            return false;
        }
        Self::commit(&mut state, from, to);
        true
    }

    pub fn history(&self) -> Vec<Transition> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn transition_count(&self) -> u64 {
        self.lock().transitions
    }

    pub fn rejected_count(&self) -> u64 {
        self.lock().rejected
    }

    fn commit(state: &mut MachineState, from: LifecycleState, to: LifecycleState) {
        state.current = to;
        state.transitions += 1;
        if state.history.len() == HISTORY_CAP {
            state.history.pop_front();
        }
        state.history.push_back(Transition {
            from,
            to,
            at: Utc::now(),
        });
        tracing::debug!(%from, %to, "lifecycle transition");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MachineState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
