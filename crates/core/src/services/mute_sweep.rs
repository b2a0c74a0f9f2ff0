//! Expired-mute sweep.
//!
//! One periodic pass over persisted state replaces per-user timers: cost is
//! bounded by the number of currently muted users and nothing is lost across
//! restarts. The periodic driver lives in the queue crate.

use std::sync::Arc;

use tracing::{error, info};
use warden_common::AppResult;

use crate::services::clock::Clock;
use crate::services::infraction_store::{ChatId, InfractionRecord, InfractionStore, UserId};

/// A mute that the sweep cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unmuted {
    pub chat_id: ChatId,
    pub user_id: UserId,
}

/// Finds and clears expired mutes.
pub struct MuteSweeper {
    store: Arc<InfractionStore>,
    clock: Arc<dyn Clock>,
}

impl MuteSweeper {
    #[must_use]
    pub fn new(store: Arc<InfractionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Clear every mute whose deadline is at or before now.
    ///
    /// Listing failures fail the whole sweep; the next tick retries. A
    /// failure on a single record is logged and the record is left for the
    /// next tick. The deadline is re-checked under the record's lock, so a
    /// mute extended meanwhile is left alone.
    pub async fn sweep(&self) -> AppResult<Vec<Unmuted>> {
        let now = self.clock.now();
        let mut unmuted = Vec::new();

        for chat_id in self.store.muted_chats().await? {
            let expired: Vec<UserId> = self
                .store
                .list_muted(chat_id)
                .await?
                .into_iter()
                .filter(|(_, until)| *until <= now)
                .map(|(user_id, _)| user_id)
                .collect();

            for user_id in expired {
                let result = self
                    .store
                    .mutate_with(chat_id, user_id, |record| {
                        let due = !record.is_banned()
                            && record.mute_until.is_some_and(|until| until <= now);
                        let next = if due {
                            InfractionRecord {
                                mute_until: None,
                                ..record.clone()
                            }
                        } else {
                            record.clone()
                        };
                        (next, due)
                    })
                    .await;

                match result {
                    Ok((_, true)) => unmuted.push(Unmuted { chat_id, user_id }),
                    Ok((_, false)) => {}
                    Err(e) => {
                        error!(chat_id, user_id, error = %e, "Failed to clear expired mute");
                    }
                }
            }
        }

        if !unmuted.is_empty() {
            info!(count = unmuted.len(), "Expired mutes cleared");
        }
        Ok(unmuted)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use crate::testing::MemoryInfractionBackend;
    use chrono::{Duration, Utc};

    struct Fixture {
        store: Arc<InfractionStore>,
        backend: Arc<MemoryInfractionBackend>,
        clock: Arc<ManualClock>,
        sweeper: MuteSweeper,
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryInfractionBackend::new());
        let store = Arc::new(InfractionStore::new(backend.clone()));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sweeper = MuteSweeper::new(store.clone(), clock.clone());
        Fixture {
            store,
            backend,
            clock,
            sweeper,
        }
    }

    async fn mute(store: &InfractionStore, user_id: UserId, until: chrono::DateTime<Utc>) {
        store
            .mutate(-100, user_id, |r| InfractionRecord {
                mute_until: Some(until),
                ..r.clone()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_future_mutes_are_not_cleared() {
        let f = fixture();
        mute(&f.store, 7, f.clock.now() + Duration::seconds(60)).await;

        assert!(f.sweeper.sweep().await.unwrap().is_empty());
        assert!(f.store.get(-100, 7).await.unwrap().mute_until.is_some());
    }

    #[tokio::test]
    async fn test_expired_mute_is_cleared_once() {
        let f = fixture();
        mute(&f.store, 7, f.clock.now() + Duration::seconds(60)).await;
        f.clock.advance(Duration::seconds(61));

        let first = f.sweeper.sweep().await.unwrap();
        let second = f.sweeper.sweep().await.unwrap();

        assert_eq!(first, vec![Unmuted { chat_id: -100, user_id: 7 }]);
        assert!(second.is_empty());
        assert!(f.store.get(-100, 7).await.unwrap().mute_until.is_none());
    }

    #[tokio::test]
    async fn test_mute_at_exact_deadline_is_cleared() {
        let f = fixture();
        mute(&f.store, 7, f.clock.now()).await;

        assert_eq!(f.sweeper.sweep().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_fails_sweep_without_changes() {
        let f = fixture();
        mute(&f.store, 7, f.clock.now()).await;
        f.backend.set_unavailable(true);

        assert!(f.sweeper.sweep().await.is_err());

        f.backend.set_unavailable(false);
        assert!(f.store.get(-100, 7).await.unwrap().mute_until.is_some());
        assert_eq!(f.sweeper.sweep().await.unwrap().len(), 1);
    }
}
