//! History store: the bounded rolling record of past exchanges.
//!
//! Owned exclusively by the orchestrator; every append and outcome record
//! happens on its thread, so readers never observe a partial exchange.

use crate::brain::{Decision, ReasoningTier};
use crate::compute::ComputeTarget;
use crate::exec::Outcome;
use crate::routing::RoutingClass;
use chrono::{DateTime, Utc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// One complete utterance-to-outcome record retained as reasoning context.
///
/// Content is immutable after append; the outcome slot is written exactly
/// once when the dispatched action finishes (including canceled ones).
#[derive(Debug, Clone)]
pub struct Exchange {
    /// Exchange id, shared with the executor for outcome correlation.
    pub id: Uuid,
    /// Utterance this exchange originated from.
    pub utterance_id: Uuid,
    /// Accepted transcript text.
    pub transcript: String,
    /// Routing class the transcript was given.
    pub routing: RoutingClass,
    /// Reasoning tier that produced the decision.
    pub tier: ReasoningTier,
    /// The structured decision.
    pub decision: Decision,
    /// Compute target, when an action was routed.
    pub compute_target: Option<ComputeTarget>,
    /// Action outcome; `None` while the action is pending or when the
    /// decision carried no action.
    pub outcome: Option<Outcome>,
    /// Append timestamp.
    pub created_at: DateTime<Utc>,
}

impl Exchange {
    /// Short transcript/response summary for prompt context.
    pub fn context_line(&self) -> String {
        let response = self
            .decision
            .speak
            .as_deref()
            .or(self.decision.action.as_deref())
            .unwrap_or("(no response)");
        format!("operator: {} / assistant: {}", self.transcript, response)
    }
}

/// Bounded rolling exchange record, oldest evicted first.
pub struct HistoryStore {
    exchanges: VecDeque<Exchange>,
    capacity: usize,
}

impl HistoryStore {
    /// Create a store retaining at most `capacity` exchanges.
    pub fn new(capacity: usize) -> Self {
        Self {
            exchanges: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append an exchange, evicting the oldest when at capacity.
    pub fn append(&mut self, exchange: Exchange) {
        if self.exchanges.len() >= self.capacity {
            self.exchanges.pop_front();
        }
        debug!(id = %exchange.id, transcript = %exchange.transcript, "exchange appended");
        self.exchanges.push_back(exchange);
    }

    /// Record the outcome for a pending exchange.
    ///
    /// Writes only an empty slot; returns false if the exchange is unknown
    /// (evicted) or its outcome was already recorded.
    pub fn record_outcome(&mut self, exchange_id: Uuid, outcome: Outcome) -> bool {
        if let Some(exchange) = self
            .exchanges
            .iter_mut()
            .find(|e| e.id == exchange_id)
        {
            if exchange.outcome.is_none() {
                debug!(id = %exchange_id, ?outcome, "outcome recorded");
                exchange.outcome = Some(outcome);
                return true;
            }
        }
        false
    }

    /// The most recent `n` exchanges, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&Exchange> {
        let start = self.exchanges.len().saturating_sub(n);
        self.exchanges.iter().skip(start).collect()
    }

    /// Iterate newest to oldest.
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter().rev()
    }

    /// Number of retained exchanges.
    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }
}

/// Shared view of the history store.
///
/// Writing is crate-private: every append and outcome record goes through
/// the orchestrator, which is the single critical section. Readers take
/// short read locks and never observe a partially appended exchange.
#[derive(Clone)]
pub struct SharedHistory {
    inner: Arc<RwLock<HistoryStore>>,
}

impl SharedHistory {
    /// Create a store retaining at most `capacity` exchanges.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HistoryStore::new(capacity))),
        }
    }

    /// Read access for context assembly and observers.
    pub fn read(&self) -> RwLockReadGuard<'_, HistoryStore> {
        self.inner.read()
    }

    /// Write access. Orchestrator only.
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, HistoryStore> {
        self.inner.write()
    }

    /// Context lines for the most recent `n` exchanges, oldest first.
    pub fn recent_lines(&self, n: usize) -> Vec<String> {
        self.inner
            .read()
            .recent(n)
            .iter()
            .map(|e| e.context_line())
            .collect()
    }

    /// Number of retained exchanges.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::Decision;

    fn exchange(transcript: &str) -> Exchange {
        Exchange {
            id: Uuid::new_v4(),
            utterance_id: Uuid::new_v4(),
            transcript: transcript.to_string(),
            routing: RoutingClass::Novel,
            tier: ReasoningTier::Deep,
            decision: Decision::speak_only("ok", 0.9),
            compute_target: None,
            outcome: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_and_recent_order() {
        let mut store = HistoryStore::new(8);
        store.append(exchange("one"));
        store.append(exchange("two"));
        store.append(exchange("three"));

        let recent: Vec<&str> = store
            .recent(2)
            .iter()
            .map(|e| e.transcript.as_str())
            .collect();
        assert_eq!(recent, vec!["two", "three"]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut store = HistoryStore::new(2);
        store.append(exchange("one"));
        store.append(exchange("two"));
        store.append(exchange("three"));

        assert_eq!(store.len(), 2);
        let all: Vec<&str> = store
            .recent(10)
            .iter()
            .map(|e| e.transcript.as_str())
            .collect();
        assert_eq!(all, vec!["two", "three"]);
    }

    #[test]
    fn test_outcome_recorded_once() {
        let mut store = HistoryStore::new(4);
        let e = exchange("run it");
        let id = e.id;
        store.append(e);

        assert!(store.record_outcome(id, Outcome::Success));
        assert!(!store.record_outcome(id, Outcome::Canceled));

        let recorded = store.recent(1)[0].outcome.clone();
        assert_eq!(recorded, Some(Outcome::Success));
    }

    #[test]
    fn test_outcome_for_unknown_exchange() {
        let mut store = HistoryStore::new(4);
        assert!(!store.record_outcome(Uuid::new_v4(), Outcome::Success));
    }

    #[test]
    fn test_iter_newest_first() {
        let mut store = HistoryStore::new(4);
        store.append(exchange("one"));
        store.append(exchange("two"));

        let newest: Vec<&str> = store
            .iter_newest_first()
            .map(|e| e.transcript.as_str())
            .collect();
        assert_eq!(newest, vec!["two", "one"]);
    }

    #[test]
    fn test_context_line() {
        let e = exchange("status check");
        assert_eq!(
            e.context_line(),
            "operator: status check / assistant: ok"
        );
    }

    #[test]
    fn test_shared_history_recent_lines() {
        let shared = SharedHistory::new(4);
        shared.write().append(exchange("one"));
        shared.write().append(exchange("two"));

        let lines = shared.recent_lines(1);
        assert_eq!(lines, vec!["operator: two / assistant: ok"]);
        assert_eq!(shared.len(), 2);
    }
}
