//! Outbound messages and their text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_common::AppError;

use crate::services::escalation::Decision;
use crate::services::infraction_store::{ChatId, InfractionRecord, UserId};

/// A message to deliver to a chat, optionally with a button menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub menu: Option<Menu>,
}

impl OutboundMessage {
    /// Plain text message.
    #[must_use]
    pub fn text(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            menu: None,
        }
    }

    /// Attach a menu.
    #[must_use]
    pub fn with_menu(mut self, menu: Option<Menu>) -> Self {
        self.menu = menu;
        self
    }
}

/// Rows of buttons rendered under a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Menu {
    pub rows: Vec<Vec<MenuButton>>,
}

impl Menu {
    /// Build a menu from rows of `(label, data)` pairs.
    #[must_use]
    pub fn from_rows(rows: &[&[(&str, &str)]]) -> Self {
        Self {
            rows: rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|(label, data)| MenuButton::new(*label, *data))
                        .collect()
                })
                .collect(),
        }
    }
}

/// A single button; `data` is sent back as callback input when pressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuButton {
    pub label: String,
    pub data: String,
}

impl MenuButton {
    #[must_use]
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Text for a committed decision.
#[must_use]
pub fn describe_decision(decision: &Decision, user_id: UserId, threshold: u32) -> String {
    match decision {
        Decision::Warn(count) => {
            format!("User {user_id} has been warned ({count}/{threshold}).")
        }
        Decision::Unwarn(count) => {
            format!("Removed a warning from user {user_id} ({count}/{threshold}).")
        }
        Decision::Mute { until } => {
            format!("User {user_id} has been muted until {}.", format_time(*until))
        }
        Decision::Unmute => format!("User {user_id} has been unmuted."),
        Decision::AutoBan(reason) => format!("User {user_id} has been banned: {reason}."),
        Decision::Unban => format!("User {user_id} has been unbanned."),
        Decision::Kick => format!("User {user_id} has been kicked."),
        Decision::NoOp => format!("No change for user {user_id}."),
    }
}

/// Text for a decision that changed nothing, given the state that caused it.
#[must_use]
pub fn describe_noop(record: &InfractionRecord) -> String {
    let user_id = record.user_id;
    if record.is_banned() {
        format!("User {user_id} is banned; unban them first.")
    } else {
        format!("No change for user {user_id}.")
    }
}

/// Text for a warnings query.
#[must_use]
pub fn describe_status(record: &InfractionRecord, threshold: u32, now: DateTime<Utc>) -> String {
    let user_id = record.user_id;
    if let Some(reason) = &record.ban_reason {
        return format!("User {user_id} is banned: {reason}.");
    }

    let mut text = format!(
        "User {user_id} has {}/{threshold} warnings.",
        record.warning_count
    );
    if let Some(until) = record.mute_until.filter(|until| *until > now) {
        text.push_str(&format!(" Muted until {}.", format_time(until)));
    }
    text
}

/// Text for an automatic unmute.
#[must_use]
pub fn describe_unmuted(user_id: UserId) -> String {
    format!("User {user_id} is no longer muted.")
}

/// Suffix appended when the platform has not confirmed an action yet.
pub const ENFORCEMENT_PENDING: &str = "Recorded, but enforcement pending.";

/// User-facing text for an error recovered at the controller boundary.
#[must_use]
pub fn describe_error(error: &AppError) -> String {
    match error {
        AppError::Unauthorized => "You are not allowed to do that.".to_string(),
        AppError::InvalidTarget(hint) | AppError::BadRequest(hint) => hint.clone(),
        AppError::SessionExpired => {
            "This panel has expired. Send /panel to start again.".to_string()
        }
        AppError::SessionRejected(prompt) => prompt.clone(),
        AppError::EnforcementFailure(_) => ENFORCEMENT_PENDING.to_string(),
        AppError::DuplicateEvent(_) => "Already handled.".to_string(),
        AppError::StoreUnavailable(_)
        | AppError::Database(_)
        | AppError::Transport(_)
        | AppError::Config(_)
        | AppError::Internal(_) => {
            "Something went wrong. Please try again in a moment.".to_string()
        }
    }
}
