//! Pipeline state: the single authoritative value describing what the
//! pipeline is doing.
//!
//! The orchestrator is the only writer; every other component holds a
//! read-only handle and may only consult snapshots.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

/// The pipeline's authoritative state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineState {
    /// Nothing engaged.
    #[default]
    Idle,
    /// Capture running, waiting for speech.
    Listening,
    /// An utterance closed and is being transcribed.
    Transcribing,
    /// A transcript is with the reasoning service.
    Thinking,
    /// An action is dispatched.
    Executing,
    /// Terminal: shutdown signal received.
    Shutdown,
}

impl PipelineState {
    /// Whether the transition `self -> to` is legal.
    ///
    /// Shutdown is reachable from anywhere and terminal; Idle is reachable
    /// from anywhere else (the recovery path for rejected or timed-out
    /// work). Transcribing is entered from Listening, from Idle, or
    /// directly from Executing on barge-in.
    pub fn can_transition(self, to: PipelineState) -> bool {
        use PipelineState::*;
        match (self, to) {
            (Shutdown, _) => false,
            (_, Shutdown) => true,
            (_, Idle) => self != Idle,
            (Idle, Listening) => true,
            (Idle, Transcribing) => true,
            // Direct text submission bypasses the audio stages.
            (Idle, Thinking) => true,
            (Listening, Transcribing) => true,
            (Executing, Transcribing) => true,
            (Transcribing, Thinking) => true,
            (Thinking, Executing) => true,
            _ => false,
        }
    }

    /// Check for the terminal state.
    pub fn is_shutdown(self) -> bool {
        matches!(self, PipelineState::Shutdown)
    }

    /// Check for the idle state.
    pub fn is_idle(self) -> bool {
        matches!(self, PipelineState::Idle)
    }

    /// Whether an action is currently dispatched.
    pub fn is_executing(self) -> bool {
        matches!(self, PipelineState::Executing)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "IDLE"),
            PipelineState::Listening => write!(f, "LISTENING"),
            PipelineState::Transcribing => write!(f, "TRANSCRIBING"),
            PipelineState::Thinking => write!(f, "THINKING"),
            PipelineState::Executing => write!(f, "EXECUTING"),
            PipelineState::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}

/// Thread-safe shared pipeline state with a single writer.
///
/// Cloning shares the underlying value. Mutation is crate-private so only
/// the orchestrator can write.
#[derive(Clone, Default)]
pub struct SharedPipelineState {
    inner: Arc<RwLock<PipelineState>>,
}

impl SharedPipelineState {
    /// Create a handle starting at `Idle`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> PipelineState {
        *self.inner.read()
    }

    /// Write a new state. Orchestrator only.
    pub(crate) fn set(&self, state: PipelineState) {
        *self.inner.write() = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(Idle.can_transition(Listening));
        assert!(Listening.can_transition(Transcribing));
        assert!(Transcribing.can_transition(Thinking));
        assert!(Thinking.can_transition(Executing));
        assert!(Executing.can_transition(Idle));
    }

    #[test]
    fn test_needs_input_shortcut() {
        assert!(Thinking.can_transition(Idle));
    }

    #[test]
    fn test_barge_in_from_executing() {
        assert!(Executing.can_transition(Transcribing));
    }

    #[test]
    fn test_recovery_to_idle_from_anywhere() {
        for state in [Listening, Transcribing, Thinking, Executing] {
            assert!(state.can_transition(Idle), "{} -> IDLE", state);
        }
        assert!(!Idle.can_transition(Idle));
    }

    #[test]
    fn test_shutdown_is_terminal() {
        for state in [Idle, Listening, Transcribing, Thinking, Executing] {
            assert!(state.can_transition(Shutdown), "{} -> SHUTDOWN", state);
        }
        assert!(!Shutdown.can_transition(Idle));
        assert!(!Shutdown.can_transition(Listening));
    }

    #[test]
    fn test_direct_text_path() {
        assert!(Idle.can_transition(Thinking));
    }

    #[test]
    fn test_illegal_skips() {
        assert!(!Listening.can_transition(Thinking));
        assert!(!Idle.can_transition(Executing));
        assert!(!Transcribing.can_transition(Executing));
    }

    #[test]
    fn test_shared_state_snapshot() {
        let shared = SharedPipelineState::new();
        assert_eq!(shared.snapshot(), Idle);

        shared.set(Listening);
        assert_eq!(shared.snapshot(), Listening);

        let clone = shared.clone();
        shared.set(Thinking);
        assert_eq!(clone.snapshot(), Thinking);
    }
}
