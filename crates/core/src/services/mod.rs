//! Moderation services.

#![allow(missing_docs)]

pub mod admin_menu;
pub mod audit;
pub mod clock;
pub mod collaborators;
pub mod controller;
pub mod conversation;
pub mod dedup;
pub mod escalation;
pub mod events;
pub mod infraction_store;
pub mod keyed_lock;
pub mod messages;
pub mod mute_sweep;
pub mod reconcile;

pub use admin_menu::{MenuState, PanelAction, PanelRequest, admin_flow};
pub use audit::{ActionKind, ActionLog, ActionLogEntry, PersistentActionLog, SYSTEM_ACTOR};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{Authorizer, EnforcementAction, Enforcer, Notifier, Role};
pub use controller::{Collaborators, ControllerSettings, ModerationController};
pub use conversation::{
    AdvanceOutcome, ConversationEngine, FlowGraph, FlowState, Pattern, Session, SessionBackend,
    SessionKey, StoredSession, Transition, TransitionContext,
};
pub use dedup::{ProcessedEventBackend, ProcessedEvents};
pub use escalation::{Decision, EscalationPolicy, ModerationEvent, parse_duration};
pub use events::{CallbackRequest, CommandKind, CommandRequest, InboundEvent, TextMessage};
pub use infraction_store::{
    ChatId, InfractionBackend, InfractionRecord, InfractionStore, Mutation, UserId,
};
pub use keyed_lock::{KeyGuard, KeyedLocks};
pub use messages::{Menu, MenuButton, OutboundMessage};
pub use mute_sweep::{MuteSweeper, Unmuted};
pub use reconcile::{
    DeadLetterView, EnforcementJob, ReconciliationContext, ReconciliationQueue,
    ReconciliationSender, ReconciliationService, enforce_with_timeout,
};
