//! Processed-event ledger for at-least-once delivery.
//!
//! Remembers the outcome produced for each event id so that a redelivered
//! event returns the same outcome without touching state again. Outcomes
//! are written through to a durable backend, so redeliveries after a
//! restart are recognized too. Recent ids are also kept in a bounded
//! in-memory cache; once `capacity` ids are cached, the oldest is dropped
//! from memory but stays in the backend until purged.

use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use warden_common::AppResult;
use warden_db::{entities::processed_event, repositories::ProcessedEventRepository};

use crate::services::keyed_lock::{KeyGuard, KeyedLocks};

/// Durable storage for event outcomes.
#[async_trait]
pub trait ProcessedEventBackend: Send + Sync {
    /// Outcome recorded for `event_id`, if any.
    async fn load(&self, event_id: &str) -> AppResult<Option<JsonValue>>;

    /// Record an outcome. An existing outcome for the id is kept.
    async fn save(&self, event_id: &str, outcome: JsonValue, at: DateTime<Utc>) -> AppResult<()>;

    /// Forget outcomes recorded before `cutoff`; returns how many.
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64>;
}

#[async_trait]
impl ProcessedEventBackend for ProcessedEventRepository {
    async fn load(&self, event_id: &str) -> AppResult<Option<JsonValue>> {
        Ok(self.find(event_id).await?.map(|model| model.outcome))
    }

    async fn save(&self, event_id: &str, outcome: JsonValue, at: DateTime<Utc>) -> AppResult<()> {
        self.insert(processed_event::Model {
            event_id: event_id.to_string(),
            outcome,
            created_at: at.fixed_offset(),
        })
        .await?;
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        self.delete_older_than(cutoff.fixed_offset()).await
    }
}

struct Ledger<V> {
    outcomes: HashMap<String, V>,
    order: VecDeque<String>,
}

/// Map from event id to the outcome it produced.
pub struct ProcessedEvents<V> {
    capacity: usize,
    ledger: Mutex<Ledger<V>>,
    in_flight: KeyedLocks<String>,
    backend: Arc<dyn ProcessedEventBackend>,
    _outcome: PhantomData<fn() -> V>,
}

impl<V: Clone + Serialize + DeserializeOwned> ProcessedEvents<V> {
    /// Create a ledger over `backend` caching at most `capacity` ids
    /// (minimum 1) in memory.
    #[must_use]
    pub fn new(backend: Arc<dyn ProcessedEventBackend>, capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ledger: Mutex::new(Ledger {
                outcomes: HashMap::new(),
                order: VecDeque::new(),
            }),
            in_flight: KeyedLocks::new(),
            backend,
            _outcome: PhantomData,
        }
    }

    /// Serialize processing of one event id.
    ///
    /// Hold the guard across the lookup, the processing and [`Self::record`]
    /// so a concurrent redelivery waits and then sees the recorded outcome.
    pub async fn claim(&self, event_id: &str) -> KeyGuard<String> {
        self.in_flight.lock(event_id.to_string()).await
    }

    /// Outcome previously recorded for `event_id`.
    ///
    /// Fails when the backend cannot be read; the caller must not process
    /// the event in that case.
    pub async fn lookup(&self, event_id: &str) -> AppResult<Option<V>> {
        if let Some(outcome) = self.cached(event_id) {
            return Ok(Some(outcome));
        }

        let Some(stored) = self.backend.load(event_id).await? else {
            return Ok(None);
        };
        let outcome: V = serde_json::from_value(stored)?;
        self.remember(event_id, outcome.clone());
        Ok(Some(outcome))
    }

    /// Record the outcome of `event_id`.
    ///
    /// The in-memory entry is kept even when the durable write fails.
    pub async fn record(&self, event_id: &str, outcome: V, at: DateTime<Utc>) -> AppResult<()> {
        let stored = serde_json::to_value(&outcome)?;
        self.remember(event_id, outcome);
        self.backend.save(event_id, stored, at).await
    }

    /// Drop durable outcomes recorded before `cutoff`.
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        self.backend.purge_before(cutoff).await
    }

    /// Number of ids cached in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ledger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, event_id: &str) -> Option<V> {
        let ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        ledger.outcomes.get(event_id).cloned()
    }

    fn remember(&self, event_id: &str, outcome: V) {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        if ledger
            .outcomes
            .insert(event_id.to_string(), outcome)
            .is_none()
        {
            ledger.order.push_back(event_id.to_string());
        }
        while ledger.order.len() > self.capacity {
            if let Some(oldest) = ledger.order.pop_front() {
                ledger.outcomes.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::MemoryProcessedEvents;
    use chrono::Duration;

    fn ledger(capacity: usize) -> (ProcessedEvents<String>, Arc<MemoryProcessedEvents>) {
        let backend = Arc::new(MemoryProcessedEvents::new());
        (ProcessedEvents::new(backend.clone(), capacity), backend)
    }

    #[tokio::test]
    async fn test_lookup_returns_recorded_outcome() {
        let (ledger, _) = ledger(10);
        assert_eq!(ledger.lookup("tg:1").await.unwrap(), None);

        ledger.record("tg:1", "warned".to_string(), Utc::now()).await.unwrap();
        assert_eq!(ledger.lookup("tg:1").await.unwrap().as_deref(), Some("warned"));
    }

    #[tokio::test]
    async fn test_evicted_ids_are_still_found_in_backend() {
        let (ledger, backend) = ledger(2);
        for id in 1..=3 {
            ledger
                .record(&format!("tg:{id}"), id.to_string(), Utc::now())
                .await
                .unwrap();
        }

        assert_eq!(ledger.len(), 2);
        assert_eq!(backend.len().await, 3);
        assert_eq!(ledger.lookup("tg:1").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_new_ledger_sees_outcomes_of_previous_one() {
        let backend = Arc::new(MemoryProcessedEvents::new());
        let before = ProcessedEvents::<String>::new(backend.clone(), 10);
        before.record("tg:1", "warned".to_string(), Utc::now()).await.unwrap();
        drop(before);

        let after = ProcessedEvents::<String>::new(backend, 10);
        assert!(after.is_empty());
        assert_eq!(after.lookup("tg:1").await.unwrap().as_deref(), Some("warned"));
    }

    #[tokio::test]
    async fn test_unreadable_backend_fails_lookup() {
        let (ledger, backend) = ledger(10);
        backend.set_unavailable(true);

        assert!(ledger.lookup("tg:1").await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_purge_removes_only_old_outcomes() {
        let (ledger, backend) = ledger(10);
        let now = Utc::now();
        ledger.record("tg:old", "a".to_string(), now - Duration::days(8)).await.unwrap();
        ledger.record("tg:new", "b".to_string(), now).await.unwrap();

        assert_eq!(ledger.purge_before(now - Duration::days(7)).await.unwrap(), 1);
        assert_eq!(backend.len().await, 1);
    }
}
