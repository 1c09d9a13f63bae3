//! Status boundary: metrics counters and the lossy observer fan-out.
//!
//! Updates are pushed on every state transition, fire-and-forget: a slow
//! or absent observer never blocks the pipeline, and observers reconnect
//! by asking for a fresh snapshot.

use crate::state::PipelineState;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared pipeline counters. All increments are relaxed; these are
/// observability data, not synchronization.
#[derive(Default)]
pub struct PipelineMetrics {
    /// Monotonically increasing count of dispatched actions.
    pub actions_dispatched: AtomicU64,
    /// Reasoning calls that hit their timeout.
    pub reasoning_timeouts: AtomicU64,
    /// Transcripts suppressed by the rejection heuristics.
    pub transcripts_rejected: AtomicU64,
    /// Transcriptions that exceeded the hard ceiling.
    pub transcription_timeouts: AtomicU64,
    /// Frames dropped at the capture hand-off.
    pub frames_dropped: AtomicU64,
    /// Barge-ins that canceled in-flight work.
    pub barge_ins: AtomicU64,
    /// Actions that hit the execution ceiling.
    pub execution_timeouts: AtomicU64,
    /// Actions that exited non-zero.
    pub execution_failures: AtomicU64,
    /// Latency of the most recent reasoning call, in milliseconds.
    pub last_decision_ms: AtomicU64,
    /// Wall time of the most recent action, in milliseconds.
    pub last_action_ms: AtomicU64,
    /// Capture liveness: true while frames are arriving.
    healthy: AtomicBool,
}

impl PipelineMetrics {
    /// Fresh counters, healthy until told otherwise.
    pub fn new() -> Arc<Self> {
        let metrics = Self::default();
        metrics.healthy.store(true, Ordering::Relaxed);
        Arc::new(metrics)
    }

    /// Mark capture liveness.
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// Current capture liveness.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            actions_dispatched: self.actions_dispatched.load(Ordering::Relaxed),
            reasoning_timeouts: self.reasoning_timeouts.load(Ordering::Relaxed),
            transcripts_rejected: self.transcripts_rejected.load(Ordering::Relaxed),
            transcription_timeouts: self.transcription_timeouts.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            barge_ins: self.barge_ins.load(Ordering::Relaxed),
            execution_timeouts: self.execution_timeouts.load(Ordering::Relaxed),
            execution_failures: self.execution_failures.load(Ordering::Relaxed),
            last_decision_ms: self.last_decision_ms.load(Ordering::Relaxed),
            last_action_ms: self.last_action_ms.load(Ordering::Relaxed),
        }
    }
}

/// Serializable counter snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub actions_dispatched: u64,
    pub reasoning_timeouts: u64,
    pub transcripts_rejected: u64,
    pub transcription_timeouts: u64,
    pub frames_dropped: u64,
    pub barge_ins: u64,
    pub execution_timeouts: u64,
    pub execution_failures: u64,
    pub last_decision_ms: u64,
    pub last_action_ms: u64,
}

/// One status push to the observer boundary.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    /// Authoritative pipeline state at push time.
    pub state: PipelineState,
    /// Capture liveness.
    pub healthy: bool,
    /// Counter snapshot.
    pub metrics: MetricsSnapshot,
}

/// Lossy status fan-out.
///
/// `publish` uses `try_send`: a full subscriber queue loses that update,
/// and a disconnected subscriber is pruned. Consumers are expected to
/// tolerate loss and re-sync from `StatusBroadcaster::publish` payloads.
#[derive(Clone, Default)]
pub struct StatusBroadcaster {
    subscribers: Arc<Mutex<Vec<Sender<StatusUpdate>>>>,
}

impl StatusBroadcaster {
    /// Create an empty broadcaster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; returns its update queue.
    pub fn subscribe(&self) -> Receiver<StatusUpdate> {
        let (tx, rx) = bounded(32);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Push an update to every observer, dropping on full queues.
    pub fn publish(&self, update: StatusUpdate) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(update.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("status observer is slow, update lost");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Number of connected observers.
    pub fn observer_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
