//! Infraction store.
//!
//! Durable per (chat, user) moderation state. Every mutation for a key runs
//! under that key's lock and is committed to the backend before the call
//! returns; mutations for different keys proceed independently.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_common::AppResult;
use warden_db::{entities::infraction, repositories::InfractionRepository};

use crate::services::keyed_lock::KeyedLocks;

/// Chat identifier as issued by the transport.
pub type ChatId = i64;

/// User identifier as issued by the transport.
pub type UserId = i64;

/// Moderation state of one user in one chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfractionRecord {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub warning_count: u32,
    /// Present iff the user is currently muted.
    pub mute_until: Option<DateTime<Utc>>,
    /// Present iff the user is banned. Supersedes any mute.
    pub ban_reason: Option<String>,
}

impl InfractionRecord {
    /// The zero-value record, equivalent to no record at all.
    #[must_use]
    pub const fn empty(chat_id: ChatId, user_id: UserId) -> Self {
        Self {
            chat_id,
            user_id,
            warning_count: 0,
            mute_until: None,
            ban_reason: None,
        }
    }

    /// Whether this record carries no warnings, mute or ban.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.warning_count == 0 && self.mute_until.is_none() && self.ban_reason.is_none()
    }

    /// Whether a ban is in force.
    #[must_use]
    pub const fn is_banned(&self) -> bool {
        self.ban_reason.is_some()
    }

    /// Whether a mute is in force at `now`. Banned users are never "muted".
    #[must_use]
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_banned() && self.mute_until.is_some_and(|until| until > now)
    }
}

impl From<infraction::Model> for InfractionRecord {
    fn from(model: infraction::Model) -> Self {
        Self {
            chat_id: model.chat_id,
            user_id: model.user_id,
            warning_count: u32::try_from(model.warning_count).unwrap_or(0),
            mute_until: model.mute_until.map(|t| t.with_timezone(&Utc)),
            ban_reason: model.ban_reason,
        }
    }
}

impl InfractionRecord {
    fn into_model(self, updated_at: DateTime<Utc>) -> infraction::Model {
        infraction::Model {
            chat_id: self.chat_id,
            user_id: self.user_id,
            warning_count: i32::try_from(self.warning_count).unwrap_or(i32::MAX),
            mute_until: self.mute_until.map(|t| t.fixed_offset()),
            ban_reason: self.ban_reason,
            updated_at: updated_at.fixed_offset(),
        }
    }
}

/// Pre- and post-mutation values of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub before: InfractionRecord,
    pub after: InfractionRecord,
}

impl Mutation {
    /// Whether the mutation changed anything.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Durable key-value storage behind the [`InfractionStore`].
///
/// Implementations must make `store` and `remove` durable before returning.
#[async_trait]
pub trait InfractionBackend: Send + Sync {
    /// Load the record for a key.
    async fn load(&self, chat_id: ChatId, user_id: UserId) -> AppResult<Option<InfractionRecord>>;

    /// Insert or overwrite a record.
    async fn store(&self, record: &InfractionRecord) -> AppResult<()>;

    /// Delete the record for a key.
    async fn remove(&self, chat_id: ChatId, user_id: UserId) -> AppResult<bool>;

    /// Records of a chat that carry a mute and no ban.
    async fn muted(&self, chat_id: ChatId) -> AppResult<Vec<InfractionRecord>>;

    /// Chats with at least one muted record.
    async fn chats_with_mutes(&self) -> AppResult<Vec<ChatId>>;

    /// Keys of records equivalent to "absent".
    async fn empty_keys(&self) -> AppResult<Vec<(ChatId, UserId)>>;

    /// Delete a record only if it is still empty.
    async fn remove_if_empty(&self, chat_id: ChatId, user_id: UserId) -> AppResult<bool>;
}

#[async_trait]
impl InfractionBackend for InfractionRepository {
    async fn load(&self, chat_id: ChatId, user_id: UserId) -> AppResult<Option<InfractionRecord>> {
        Ok(self.find(chat_id, user_id).await?.map(Into::into))
    }

    async fn store(&self, record: &InfractionRecord) -> AppResult<()> {
        self.upsert(record.clone().into_model(Utc::now())).await
    }

    async fn remove(&self, chat_id: ChatId, user_id: UserId) -> AppResult<bool> {
        self.delete(chat_id, user_id).await
    }

    async fn muted(&self, chat_id: ChatId) -> AppResult<Vec<InfractionRecord>> {
        Ok(self
            .find_muted(chat_id)
            .await?
            .into_iter()
            .map(Into::into)
            .collect())
    }

    async fn chats_with_mutes(&self) -> AppResult<Vec<ChatId>> {
        self.find_chats_with_mutes().await
    }

    async fn empty_keys(&self) -> AppResult<Vec<(ChatId, UserId)>> {
        self.find_empty_keys().await
    }

    async fn remove_if_empty(&self, chat_id: ChatId, user_id: UserId) -> AppResult<bool> {
        self.delete_if_empty(chat_id, user_id).await
    }
}

/// Per-key serialized access to infraction records.
pub struct InfractionStore {
    backend: Arc<dyn InfractionBackend>,
    locks: KeyedLocks<(ChatId, UserId)>,
}

impl InfractionStore {
    /// Create a store over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn InfractionBackend>) -> Self {
        Self {
            backend,
            locks: KeyedLocks::new(),
        }
    }

    /// Get the record for a key, or the zero-value record if none exists.
    pub async fn get(&self, chat_id: ChatId, user_id: UserId) -> AppResult<InfractionRecord> {
        Ok(self
            .backend
            .load(chat_id, user_id)
            .await?
            .unwrap_or_else(|| InfractionRecord::empty(chat_id, user_id)))
    }

    /// Apply a pure transform to a record under exclusive access to its key.
    pub async fn mutate<F>(&self, chat_id: ChatId, user_id: UserId, f: F) -> AppResult<Mutation>
    where
        F: FnOnce(&InfractionRecord) -> InfractionRecord + Send,
    {
        let (mutation, ()) = self
            .mutate_with(chat_id, user_id, |record| (f(record), ()))
            .await?;
        Ok(mutation)
    }

    /// Like [`Self::mutate`], but the transform also returns a value
    /// computed from the locked pre-state.
    ///
    /// The new value is flushed to the backend before this returns. An
    /// unchanged record is not written, so no record is created for events
    /// that decide nothing.
    pub async fn mutate_with<F, T>(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        f: F,
    ) -> AppResult<(Mutation, T)>
    where
        F: FnOnce(&InfractionRecord) -> (InfractionRecord, T) + Send,
        T: Send,
    {
        let _guard = self.locks.lock((chat_id, user_id)).await;

        let before = self.get(chat_id, user_id).await?;
        let (mut after, value) = f(&before);
        after.chat_id = chat_id;
        after.user_id = user_id;

        if after != before {
            self.backend.store(&after).await?;
            debug!(chat_id, user_id, warnings = after.warning_count, "Infraction record updated");
        }

        Ok((Mutation { before, after }, value))
    }

    /// Delete a record outright (explicit reset).
    pub async fn reset(&self, chat_id: ChatId, user_id: UserId) -> AppResult<bool> {
        let _guard = self.locks.lock((chat_id, user_id)).await;
        self.backend.remove(chat_id, user_id).await
    }

    /// Snapshot of muted users in a chat.
    pub async fn list_muted(&self, chat_id: ChatId) -> AppResult<Vec<(UserId, DateTime<Utc>)>> {
        Ok(self
            .backend
            .muted(chat_id)
            .await?
            .into_iter()
            .filter(|record| !record.is_banned())
            .filter_map(|record| record.mute_until.map(|until| (record.user_id, until)))
            .collect())
    }

    /// Chats that currently have muted users.
    pub async fn muted_chats(&self) -> AppResult<Vec<ChatId>> {
        self.backend.chats_with_mutes().await
    }

    /// Remove all empty records.
    ///
    /// Candidates are collected first, then each is re-checked and removed
    /// under its own key lock, so a mutation racing with compaction always
    /// wins.
    pub async fn compact(&self) -> AppResult<u64> {
        let mut removed = 0;
        for (chat_id, user_id) in self.backend.empty_keys().await? {
            let _guard = self.locks.lock((chat_id, user_id)).await;
            if self.backend.remove_if_empty(chat_id, user_id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::MemoryInfractionBackend;
    use chrono::Duration;

    fn store() -> (Arc<MemoryInfractionBackend>, InfractionStore) {
        let backend = Arc::new(MemoryInfractionBackend::new());
        let store = InfractionStore::new(backend.clone());
        (backend, store)
    }

    #[tokio::test]
    async fn test_get_missing_returns_empty_record() {
        let (_, store) = store();
        let record = store.get(-100, 7).await.unwrap();
        assert_eq!(record, InfractionRecord::empty(-100, 7));
    }

    #[tokio::test]
    async fn test_mutate_persists_before_returning() {
        let (backend, store) = store();

        let mutation = store
            .mutate(-100, 7, |r| InfractionRecord {
                warning_count: r.warning_count + 1,
                ..r.clone()
            })
            .await
            .unwrap();

        assert!(mutation.changed());
        assert_eq!(backend.snapshot().await.len(), 1);
        assert_eq!(store.get(-100, 7).await.unwrap().warning_count, 1);
    }

    #[tokio::test]
    async fn test_unchanged_mutation_creates_no_record() {
        let (backend, store) = store();
        let mutation = store.mutate(-100, 7, InfractionRecord::clone).await.unwrap();

        assert!(!mutation.changed());
        assert!(backend.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_mutations_do_not_lose_updates() {
        let (_, store) = store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .mutate(-100, 7, |r| InfractionRecord {
                            warning_count: r.warning_count + 1,
                            ..r.clone()
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.get(-100, 7).await.unwrap().warning_count, 20);
    }

    #[tokio::test]
    async fn test_list_muted_skips_banned_users() {
        let (_, store) = store();
        let until = Utc::now() + Duration::minutes(5);

        store
            .mutate(-100, 1, |r| InfractionRecord {
                mute_until: Some(until),
                ..r.clone()
            })
            .await
            .unwrap();
        store
            .mutate(-100, 2, |r| InfractionRecord {
                mute_until: Some(until),
                ban_reason: Some("spam".to_string()),
                ..r.clone()
            })
            .await
            .unwrap();

        let muted = store.list_muted(-100).await.unwrap();
        assert_eq!(muted, vec![(1, until)]);
    }

    #[tokio::test]
    async fn test_compact_removes_only_empty_records() {
        let (backend, store) = store();
        backend.insert(InfractionRecord::empty(-100, 1)).await;
        store
            .mutate(-100, 2, |r| InfractionRecord {
                warning_count: 1,
                ..r.clone()
            })
            .await
            .unwrap();

        assert_eq!(store.compact().await.unwrap(), 1);
        let remaining = backend.snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].user_id, 2);
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails_without_mutation() {
        let (backend, store) = store();
        backend.set_unavailable(true);

        let result = store
            .mutate(-100, 7, |r| InfractionRecord {
                warning_count: 1,
                ..r.clone()
            })
            .await;

        assert!(matches!(
            result,
            Err(warden_common::AppError::StoreUnavailable(_))
        ));
        backend.set_unavailable(false);
        assert!(backend.snapshot().await.is_empty());
    }
}
