//! Database entities.

#![allow(missing_docs)]

pub mod action_log;
pub mod conversation_session;
pub mod infraction;
pub mod processed_event;

pub use action_log::Entity as ActionLog;
pub use conversation_session::Entity as ConversationSession;
pub use infraction::Entity as Infraction;
pub use processed_event::Entity as ProcessedEvent;
