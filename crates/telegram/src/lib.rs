//! Telegram transport for warden.
//!
//! - **Client**: Bot API calls over reqwest
//! - **Adapter**: [`TelegramGateway`] as authorizer, enforcer and notifier
//! - **Inbound**: update parsing and long polling

pub mod adapter;
pub mod client;
pub mod inbound;
pub mod types;

pub use adapter::{TelegramGateway, keyboard, role_for_status};
pub use client::{TelegramClient, TelegramError};
pub use inbound::{UpdatePoller, parse_update};
