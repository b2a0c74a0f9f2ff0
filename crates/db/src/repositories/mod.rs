//! Repositories over the database entities.

pub mod action_log;
pub mod conversation_session;
pub mod infraction;
pub mod processed_event;

pub use action_log::ActionLogRepository;
pub use conversation_session::ConversationSessionRepository;
pub use infraction::InfractionRepository;
pub use processed_event::ProcessedEventRepository;
