//! Conversation engine.
//!
//! A generic finite-state-machine driver for multi-step interactions. A
//! [`FlowGraph`] declares, per state, which inputs are accepted and where
//! each leads; the [`ConversationEngine`] keeps one session per key,
//! persists it through a [`SessionBackend`] and advances it one input at a
//! time under a per-key lock.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};
use warden_common::{AppError, AppResult};
use warden_db::{entities::conversation_session, repositories::ConversationSessionRepository};

use crate::services::clock::Clock;
use crate::services::infraction_store::{ChatId, UserId};
use crate::services::keyed_lock::KeyedLocks;

/// Input accepted from every non-terminal state to abandon a flow.
pub const CANCEL_INPUT: &str = "cancel";

/// Bounds for a flow's state type.
pub trait FlowState:
    Clone + Debug + Eq + Hash + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> FlowState for T where
    T: Clone + Debug + Eq + Hash + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Identifies one session: an admin inside a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub chat_id: ChatId,
    pub admin_id: UserId,
}

impl SessionKey {
    #[must_use]
    pub const fn new(chat_id: ChatId, admin_id: UserId) -> Self {
        Self { chat_id, admin_id }
    }
}

/// An input pattern a state accepts.
#[derive(Clone)]
pub enum Pattern {
    /// Exactly this text, case-insensitive.
    Exact(String),
    /// Text starting with this prefix.
    Prefix(String),
    /// Any non-empty text.
    Any,
    /// Custom check.
    Predicate(fn(&str) -> bool),
}

impl Pattern {
    /// Whether `input` matches. Input is trimmed before matching.
    #[must_use]
    pub fn matches(&self, input: &str) -> bool {
        let input = input.trim();
        match self {
            Self::Exact(text) => input.eq_ignore_ascii_case(text),
            Self::Prefix(prefix) => input.starts_with(prefix.as_str()),
            Self::Any => !input.is_empty(),
            Self::Predicate(check) => check(input),
        }
    }
}

/// What a side-effect callback sees of a transition.
#[derive(Debug, Clone)]
pub struct TransitionContext<S> {
    pub key: SessionKey,
    pub from: S,
    pub to: S,
    pub input: String,
    pub inputs: Vec<String>,
}

type Effect<S> = Arc<dyn Fn(&TransitionContext<S>) + Send + Sync>;

/// One outgoing edge of a state.
pub struct Transition<S> {
    pattern: Pattern,
    to: S,
    collect: bool,
    effect: Option<Effect<S>>,
}

impl<S: FlowState> Transition<S> {
    /// Edge taken when `pattern` matches.
    #[must_use]
    pub const fn new(pattern: Pattern, to: S) -> Self {
        Self {
            pattern,
            to,
            collect: false,
            effect: None,
        }
    }

    /// Append the matching input to the session's collected inputs.
    #[must_use]
    pub const fn collect(mut self) -> Self {
        self.collect = true;
        self
    }

    /// Run `effect` once the transition has been persisted.
    #[must_use]
    pub fn effect(mut self, effect: impl Fn(&TransitionContext<S>) + Send + Sync + 'static) -> Self {
        self.effect = Some(Arc::new(effect));
        self
    }
}

/// Directed graph of states and accepted inputs.
pub struct FlowGraph<S> {
    edges: HashMap<S, Vec<Transition<S>>>,
    hints: HashMap<S, String>,
    terminals: HashSet<S>,
}

impl<S: FlowState> FlowGraph<S> {
    /// Create a graph whose cancel input leads to `cancelled`.
    #[must_use]
    pub fn new(cancelled: S) -> Self {
        Self {
            edges: HashMap::new(),
            hints: HashMap::new(),
            terminals: HashSet::from([cancelled]),
        }
    }

    /// Add an edge out of `from`. Edges are tried in insertion order.
    #[must_use]
    pub fn edge(mut self, from: S, transition: Transition<S>) -> Self {
        self.edges.entry(from).or_default().push(transition);
        self
    }

    /// Mark `state` as terminal: reaching it completes the session.
    #[must_use]
    pub fn terminal(mut self, state: S) -> Self {
        self.terminals.insert(state);
        self
    }

    /// Re-prompt text returned when `state` rejects an input.
    #[must_use]
    pub fn hint(mut self, state: S, text: impl Into<String>) -> Self {
        self.hints.insert(state, text.into());
        self
    }

    #[must_use]
    pub fn is_terminal(&self, state: &S) -> bool {
        self.terminals.contains(state)
    }

    fn accepts(&self, from: &S, input: &str) -> Option<&Transition<S>> {
        self.edges
            .get(from)?
            .iter()
            .find(|transition| transition.pattern.matches(input))
    }

    fn rejection(&self, state: &S) -> String {
        self.hints
            .get(state)
            .cloned()
            .unwrap_or_else(|| "Unrecognized input, please try again.".to_string())
    }
}

/// An open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session<S> {
    pub key: SessionKey,
    pub state: S,
    pub inputs: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

/// Result of feeding one input to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome<S> {
    /// Moved to a non-terminal state; the deadline was refreshed.
    Transitioned { state: S, inputs: Vec<String> },
    /// Input matched nothing; the session is unchanged.
    Rejected(String),
    /// Reached a terminal state; the session is gone.
    Completed { state: S, inputs: Vec<String> },
    /// Cancel input accepted; the session is gone and no effect ran.
    Cancelled,
    /// No live session for the key.
    Expired,
}

/// Persisted form of a session, independent of the state type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub state: serde_json::Value,
    pub inputs: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Durable storage of sessions.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn load(&self, key: SessionKey) -> AppResult<Option<StoredSession>>;

    /// Create or replace.
    async fn save(&self, key: SessionKey, session: &StoredSession) -> AppResult<()>;

    async fn remove(&self, key: SessionKey) -> AppResult<()>;

    /// Keys whose deadline is at or before `now`.
    async fn expired_keys(&self, now: DateTime<Utc>) -> AppResult<Vec<SessionKey>>;
}

#[async_trait]
impl SessionBackend for ConversationSessionRepository {
    async fn load(&self, key: SessionKey) -> AppResult<Option<StoredSession>> {
        let Some(model) = self.find(key.chat_id, key.admin_id).await? else {
            return Ok(None);
        };
        Ok(Some(StoredSession {
            state: model.state,
            inputs: serde_json::from_value(model.collected_inputs)?,
            expires_at: model.expires_at.with_timezone(&Utc),
            created_at: model.created_at.with_timezone(&Utc),
        }))
    }

    async fn save(&self, key: SessionKey, session: &StoredSession) -> AppResult<()> {
        self.upsert(conversation_session::Model {
            chat_id: key.chat_id,
            admin_id: key.admin_id,
            state: session.state.clone(),
            collected_inputs: serde_json::to_value(&session.inputs)?,
            expires_at: session.expires_at.fixed_offset(),
            created_at: session.created_at.fixed_offset(),
        })
        .await
    }

    async fn remove(&self, key: SessionKey) -> AppResult<()> {
        self.delete(key.chat_id, key.admin_id).await
    }

    async fn expired_keys(&self, now: DateTime<Utc>) -> AppResult<Vec<SessionKey>> {
        Ok(self
            .find_expired_keys(now.fixed_offset())
            .await?
            .into_iter()
            .map(|(chat_id, admin_id)| SessionKey::new(chat_id, admin_id))
            .collect())
    }
}

/// Drives sessions over a [`FlowGraph`].
pub struct ConversationEngine<S> {
    graph: Arc<FlowGraph<S>>,
    backend: Arc<dyn SessionBackend>,
    locks: KeyedLocks<SessionKey>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl<S: FlowState> ConversationEngine<S> {
    #[must_use]
    pub fn new(
        graph: FlowGraph<S>,
        backend: Arc<dyn SessionBackend>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            backend,
            locks: KeyedLocks::new(),
            clock,
            ttl,
        }
    }

    /// Create or replace the session for `key`, starting at `initial`.
    pub async fn start(&self, key: SessionKey, initial: S) -> AppResult<Session<S>> {
        if self.graph.is_terminal(&initial) {
            return Err(AppError::BadRequest(format!(
                "cannot start a session in terminal state {initial:?}"
            )));
        }

        let _guard = self.locks.lock(key).await;
        let now = self.clock.now();
        let stored = StoredSession {
            state: serde_json::to_value(&initial)?,
            inputs: Vec::new(),
            expires_at: now + self.ttl,
            created_at: now,
        };
        self.backend.save(key, &stored).await?;
        debug!(chat_id = key.chat_id, admin_id = key.admin_id, state = ?initial, "Session started");

        Ok(Session {
            key,
            state: initial,
            inputs: stored.inputs,
            expires_at: stored.expires_at,
        })
    }

    /// Feed one input to the session for `key`.
    ///
    /// A session past its deadline is destroyed and reported as expired
    /// without attempting the transition. Side effects run only after the
    /// new state is persisted, and never on cancel or expiry.
    pub async fn advance(&self, key: SessionKey, input: &str) -> AppResult<AdvanceOutcome<S>> {
        let _guard = self.locks.lock(key).await;

        let Some(stored) = self.backend.load(key).await? else {
            return Ok(AdvanceOutcome::Expired);
        };

        let now = self.clock.now();
        if stored.expires_at <= now {
            self.backend.remove(key).await?;
            debug!(chat_id = key.chat_id, admin_id = key.admin_id, "Session expired");
            return Ok(AdvanceOutcome::Expired);
        }

        let state: S = match serde_json::from_value(stored.state) {
            Ok(state) => state,
            Err(e) => {
                warn!(chat_id = key.chat_id, admin_id = key.admin_id, error = %e, "Unreadable session discarded");
                self.backend.remove(key).await?;
                return Ok(AdvanceOutcome::Expired);
            }
        };

        if input.trim().eq_ignore_ascii_case(CANCEL_INPUT) {
            self.backend.remove(key).await?;
            debug!(chat_id = key.chat_id, admin_id = key.admin_id, from = ?state, "Session cancelled");
            return Ok(AdvanceOutcome::Cancelled);
        }

        let Some(transition) = self.graph.accepts(&state, input) else {
            return Ok(AdvanceOutcome::Rejected(self.graph.rejection(&state)));
        };

        let mut inputs = stored.inputs;
        if transition.collect {
            inputs.push(input.trim().to_string());
        }
        let to = transition.to.clone();
        let completed = self.graph.is_terminal(&to);

        if completed {
            self.backend.remove(key).await?;
        } else {
            let next = StoredSession {
                state: serde_json::to_value(&to)?,
                inputs: inputs.clone(),
                expires_at: now + self.ttl,
                created_at: stored.created_at,
            };
            self.backend.save(key, &next).await?;
        }
        debug!(chat_id = key.chat_id, admin_id = key.admin_id, from = ?state, to = ?to, "Session advanced");

        if let Some(effect) = &transition.effect {
            effect(&TransitionContext {
                key,
                from: state,
                to: to.clone(),
                input: input.trim().to_string(),
                inputs: inputs.clone(),
            });
        }

        Ok(if completed {
            AdvanceOutcome::Completed { state: to, inputs }
        } else {
            AdvanceOutcome::Transitioned { state: to, inputs }
        })
    }

    /// The live session for `key`, if any. Does not destroy expired ones.
    pub async fn current(&self, key: SessionKey) -> AppResult<Option<Session<S>>> {
        let Some(stored) = self.backend.load(key).await? else {
            return Ok(None);
        };
        if stored.expires_at <= self.clock.now() {
            return Ok(None);
        }
        Ok(Some(Session {
            key,
            state: serde_json::from_value(stored.state)?,
            inputs: stored.inputs,
            expires_at: stored.expires_at,
        }))
    }

    /// Destroy every session past its deadline.
    ///
    /// Each candidate is re-checked under its key lock, so a session
    /// refreshed by a concurrent `advance` survives.
    pub async fn sweep_expired(&self) -> AppResult<u64> {
        let now = self.clock.now();
        let mut removed = 0;
        for key in self.backend.expired_keys(now).await? {
            let _guard = self.locks.lock(key).await;
            let still_expired = self
                .backend
                .load(key)
                .await?
                .is_some_and(|stored| stored.expires_at <= now);
            if still_expired {
                self.backend.remove(key).await?;
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
    use crate::services::clock::ManualClock;
    use crate::testing::MemorySessionBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    enum Step {
        Root,
        Picked,
        Done,
        Cancelled,
    }

    struct Fixture {
        engine: ConversationEngine<Step>,
        backend: Arc<MemorySessionBackend>,
        clock: Arc<ManualClock>,
        effects: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let effects = Arc::new(AtomicUsize::new(0));
        let on_pick = effects.clone();
        let on_done = effects.clone();

        let graph = FlowGraph::new(Step::Cancelled)
            .edge(
                Step::Root,
                Transition::new(Pattern::Prefix("pick:".to_string()), Step::Picked)
                    .collect()
                    .effect(move |_| {
                        on_pick.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .edge(
                Step::Picked,
                Transition::new(Pattern::Exact("confirm".to_string()), Step::Done).effect(
                    move |_| {
                        on_done.fetch_add(1, Ordering::SeqCst);
                    },
                ),
            )
            .terminal(Step::Done)
            .hint(Step::Root, "Pick something.");

        let backend = Arc::new(MemorySessionBackend::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = ConversationEngine::new(
            graph,
            backend.clone(),
            clock.clone(),
            Duration::seconds(300),
        );

        Fixture {
            engine,
            backend,
            clock,
            effects,
        }
    }

    const KEY: SessionKey = SessionKey::new(-100, 1);

    #[tokio::test]
    async fn test_rejected_input_leaves_session_unchanged() {
        let f = fixture();
        f.engine.start(KEY, Step::Root).await.unwrap();
        let before = f.engine.current(KEY).await.unwrap();

        let outcome = f.engine.advance(KEY, "hello").await.unwrap();

        assert_eq!(outcome, AdvanceOutcome::Rejected("Pick something.".to_string()));
        assert_eq!(f.engine.current(KEY).await.unwrap(), before);
        assert_eq!(f.effects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_flow_completes_and_destroys_session() {
        let f = fixture();
        f.engine.start(KEY, Step::Root).await.unwrap();

        let outcome = f.engine.advance(KEY, "pick:ban").await.unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Transitioned {
                state: Step::Picked,
                inputs: vec!["pick:ban".to_string()]
            }
        );

        let outcome = f.engine.advance(KEY, "CONFIRM").await.unwrap();
        assert_eq!(
            outcome,
            AdvanceOutcome::Completed {
                state: Step::Done,
                inputs: vec!["pick:ban".to_string()]
            }
        );
        assert_eq!(f.effects.load(Ordering::SeqCst), 2);
        assert!(f.backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancel_from_any_state_runs_no_effect() {
        for advance_first in [false, true] {
            let f = fixture();
            f.engine.start(KEY, Step::Root).await.unwrap();
            if advance_first {
                f.engine.advance(KEY, "pick:mute").await.unwrap();
            }
            let before = f.effects.load(Ordering::SeqCst);

            let outcome = f.engine.advance(KEY, "cancel").await.unwrap();

            assert_eq!(outcome, AdvanceOutcome::Cancelled);
            assert_eq!(f.effects.load(Ordering::SeqCst), before);
            assert!(f.backend.is_empty().await);
        }
    }

    #[tokio::test]
    async fn test_expired_session_never_runs_effect() {
        let f = fixture();
        f.engine.start(KEY, Step::Root).await.unwrap();
        f.clock.advance(Duration::seconds(301));

        let outcome = f.engine.advance(KEY, "pick:ban").await.unwrap();

        assert_eq!(outcome, AdvanceOutcome::Expired);
        assert_eq!(f.effects.load(Ordering::SeqCst), 0);
        assert!(f.backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_transition_refreshes_deadline() {
        let f = fixture();
        f.engine.start(KEY, Step::Root).await.unwrap();
        f.clock.advance(Duration::seconds(200));
        f.engine.advance(KEY, "pick:warn").await.unwrap();
        f.clock.advance(Duration::seconds(200));

        let outcome = f.engine.advance(KEY, "confirm").await.unwrap();
        assert!(matches!(outcome, AdvanceOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn test_missing_session_is_expired() {
        let f = fixture();
        let outcome = f.engine.advance(KEY, "pick:ban").await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Expired);
    }

    #[tokio::test]
    async fn test_start_in_terminal_state_is_rejected() {
        let f = fixture();
        assert!(f.engine.start(KEY, Step::Done).await.is_err());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_sessions() {
        let f = fixture();
        f.engine.start(KEY, Step::Root).await.unwrap();
        f.clock.advance(Duration::seconds(250));
        f.engine
            .start(SessionKey::new(-100, 2), Step::Root)
            .await
            .unwrap();
        f.clock.advance(Duration::seconds(100));

        assert_eq!(f.engine.sweep_expired().await.unwrap(), 1);
        assert!(f.engine.current(KEY).await.unwrap().is_none());
        assert!(
            f.engine
                .current(SessionKey::new(-100, 2))
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_concurrent_advances_are_serialized() {
        let f = fixture();
        let engine = Arc::new(f.engine);
        engine.start(KEY, Step::Root).await.unwrap();

        let a = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.advance(KEY, "pick:ban").await.unwrap() })
        };
        let b = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.advance(KEY, "pick:warn").await.unwrap() })
        };
        let outcomes = [a.await.unwrap(), b.await.unwrap()];

        let transitioned = outcomes
            .iter()
            .filter(|o| matches!(o, AdvanceOutcome::Transitioned { .. }))
            .count();
        assert_eq!(transitioned, 1);
        assert_eq!(f.effects.load(Ordering::SeqCst), 1);
    }
}
