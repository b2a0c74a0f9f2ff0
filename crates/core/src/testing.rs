//! In-memory backends and recording collaborators for tests.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use warden_common::{AppError, AppResult};

use crate::services::audit::{ActionLog, ActionLogEntry};
use crate::services::collaborators::{Authorizer, EnforcementAction, Enforcer, Notifier, Role};
use crate::services::conversation::{SessionBackend, SessionKey, StoredSession};
use crate::services::dedup::ProcessedEventBackend;
use crate::services::infraction_store::{ChatId, InfractionBackend, InfractionRecord, UserId};
use crate::services::messages::OutboundMessage;
use crate::services::reconcile::{EnforcementJob, ReconciliationQueue};

fn unavailable() -> AppError {
    AppError::StoreUnavailable("backend offline".to_string())
}

/// Infraction backend over a map, with a switch to simulate outages.
#[derive(Default)]
pub struct MemoryInfractionBackend {
    records: RwLock<HashMap<(ChatId, UserId), InfractionRecord>>,
    unavailable: AtomicBool,
}

impl MemoryInfractionBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `StoreUnavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Write a record directly, bypassing the store.
    pub async fn insert(&self, record: InfractionRecord) {
        self.records
            .write()
            .await
            .insert((record.chat_id, record.user_id), record);
    }

    /// All records, ordered by key.
    pub async fn snapshot(&self) -> Vec<InfractionRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| (r.chat_id, r.user_id));
        records
    }

    fn check(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl InfractionBackend for MemoryInfractionBackend {
    async fn load(&self, chat_id: ChatId, user_id: UserId) -> AppResult<Option<InfractionRecord>> {
        self.check()?;
        Ok(self.records.read().await.get(&(chat_id, user_id)).cloned())
    }

    async fn store(&self, record: &InfractionRecord) -> AppResult<()> {
        self.check()?;
        self.insert(record.clone()).await;
        Ok(())
    }

    async fn remove(&self, chat_id: ChatId, user_id: UserId) -> AppResult<bool> {
        self.check()?;
        Ok(self.records.write().await.remove(&(chat_id, user_id)).is_some())
    }

    async fn muted(&self, chat_id: ChatId) -> AppResult<Vec<InfractionRecord>> {
        self.check()?;
        let mut muted: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.chat_id == chat_id && r.mute_until.is_some() && !r.is_banned())
            .cloned()
            .collect();
        muted.sort_by_key(|r| r.mute_until);
        Ok(muted)
    }

    async fn chats_with_mutes(&self) -> AppResult<Vec<ChatId>> {
        self.check()?;
        let mut chats: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.mute_until.is_some() && !r.is_banned())
            .map(|r| r.chat_id)
            .collect();
        chats.sort_unstable();
        chats.dedup();
        Ok(chats)
    }

    async fn empty_keys(&self) -> AppResult<Vec<(ChatId, UserId)>> {
        self.check()?;
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|(_, r)| r.is_empty())
            .map(|(key, _)| *key)
            .collect())
    }

    async fn remove_if_empty(&self, chat_id: ChatId, user_id: UserId) -> AppResult<bool> {
        self.check()?;
        let mut records = self.records.write().await;
        if records
            .get(&(chat_id, user_id))
            .is_some_and(InfractionRecord::is_empty)
        {
            records.remove(&(chat_id, user_id));
            return Ok(true);
        }
        Ok(false)
    }
}

/// Session backend over a map.
#[derive(Default)]
pub struct MemorySessionBackend {
    sessions: RwLock<HashMap<SessionKey, StoredSession>>,
}

impl MemorySessionBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn load(&self, key: SessionKey) -> AppResult<Option<StoredSession>> {
        Ok(self.sessions.read().await.get(&key).cloned())
    }

    async fn save(&self, key: SessionKey, session: &StoredSession) -> AppResult<()> {
        self.sessions.write().await.insert(key, session.clone());
        Ok(())
    }

    async fn remove(&self, key: SessionKey) -> AppResult<()> {
        self.sessions.write().await.remove(&key);
        Ok(())
    }

    async fn expired_keys(&self, now: DateTime<Utc>) -> AppResult<Vec<SessionKey>> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.expires_at <= now)
            .map(|(key, _)| *key)
            .collect())
    }
}

/// Processed-event backend over a map, with a switch to simulate outages.
#[derive(Default)]
pub struct MemoryProcessedEvents {
    outcomes: RwLock<HashMap<String, (Value, DateTime<Utc>)>>,
    unavailable: AtomicBool,
}

impl MemoryProcessedEvents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored outcomes.
    pub async fn len(&self) -> usize {
        self.outcomes.read().await.len()
    }

    fn check(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(unavailable())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ProcessedEventBackend for MemoryProcessedEvents {
    async fn load(&self, event_id: &str) -> AppResult<Option<Value>> {
        self.check()?;
        Ok(self
            .outcomes
            .read()
            .await
            .get(event_id)
            .map(|(outcome, _)| outcome.clone()))
    }

    async fn save(&self, event_id: &str, outcome: Value, at: DateTime<Utc>) -> AppResult<()> {
        self.check()?;
        self.outcomes
            .write()
            .await
            .entry(event_id.to_string())
            .or_insert((outcome, at));
        Ok(())
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> AppResult<u64> {
        self.check()?;
        let mut outcomes = self.outcomes.write().await;
        let before = outcomes.len();
        outcomes.retain(|_, (_, at)| *at >= cutoff);
        Ok((before - outcomes.len()) as u64)
    }
}

/// Action log kept in memory.
#[derive(Default)]
pub struct MemoryActionLog {
    entries: RwLock<Vec<ActionLogEntry>>,
}

impl MemoryActionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries in append order.
    pub async fn entries(&self) -> Vec<ActionLogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl ActionLog for MemoryActionLog {
    async fn append(&self, entry: ActionLogEntry) -> AppResult<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn recent(&self, chat_id: ChatId, limit: u64) -> AppResult<Vec<ActionLogEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .rev()
            .filter(|e| e.chat_id == Some(chat_id))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

/// Authorizer with fixed roles; unknown users are members.
#[derive(Default)]
pub struct StaticAuthorizer {
    roles: HashMap<(ChatId, UserId), Role>,
}

impl StaticAuthorizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_role(mut self, chat_id: ChatId, user_id: UserId, role: Role) -> Self {
        self.roles.insert((chat_id, user_id), role);
        self
    }
}

#[async_trait]
impl Authorizer for StaticAuthorizer {
    async fn is_authorized(
        &self,
        chat_id: ChatId,
        actor_id: UserId,
        required: Role,
    ) -> AppResult<bool> {
        let role = self
            .roles
            .get(&(chat_id, actor_id))
            .copied()
            .unwrap_or(Role::Member);
        Ok(role >= required)
    }
}

/// Enforcer that records calls and can be told to fail or stall.
#[derive(Default)]
pub struct RecordingEnforcer {
    calls: AtomicU32,
    fail_remaining: AtomicU32,
    delay_ms: AtomicU64,
    successes: Mutex<Vec<(ChatId, UserId, EnforcementAction)>>,
}

impl RecordingEnforcer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls.
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    /// Stall every call for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    /// Number of calls started.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that succeeded, in order.
    pub fn successes(&self) -> Vec<(ChatId, UserId, EnforcementAction)> {
        self.successes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Enforcer for RecordingEnforcer {
    async fn enforce(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        action: &EnforcementAction,
    ) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failing = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AppError::Transport("platform rejected the call".to_string()));
        }

        self.successes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((chat_id, user_id, *action));
        Ok(())
    }
}

/// Notifier that records delivered messages.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<OutboundMessage>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &OutboundMessage) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Transport("send failed".to_string()));
        }
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}

/// Reconciliation queue that only records jobs.
#[derive(Default)]
pub struct RecordingQueue {
    jobs: Mutex<Vec<EnforcementJob>>,
}

impl RecordingQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<EnforcementJob> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ReconciliationQueue for RecordingQueue {
    async fn enqueue(&self, job: EnforcementJob) -> AppResult<()> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job);
        Ok(())
    }
}
