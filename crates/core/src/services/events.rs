//! Inbound events as the controller sees them.

use serde::{Deserialize, Serialize};

use crate::services::collaborators::Role;
use crate::services::infraction_store::{ChatId, UserId};

/// A moderation command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Warn,
    Unwarn,
    ResetWarnings,
    Mute,
    Unmute,
    Ban,
    Unban,
    Kick,
    /// Read-only status query.
    Warnings,
    /// Open the admin panel.
    Panel,
}

impl CommandKind {
    /// Parse a command name without its leading slash, e.g. `warn` or
    /// `warn@SomeBot`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.split('@').next().unwrap_or(name);
        match name.to_ascii_lowercase().as_str() {
            "warn" => Some(Self::Warn),
            "unwarn" => Some(Self::Unwarn),
            "resetwarns" => Some(Self::ResetWarnings),
            "mute" => Some(Self::Mute),
            "unmute" => Some(Self::Unmute),
            "ban" => Some(Self::Ban),
            "unban" => Some(Self::Unban),
            "kick" => Some(Self::Kick),
            "warns" => Some(Self::Warnings),
            "panel" => Some(Self::Panel),
            _ => None,
        }
    }

    /// Role an actor needs to issue this command.
    #[must_use]
    pub const fn required_role(&self) -> Role {
        match self {
            Self::Warnings => Role::Member,
            Self::ResetWarnings => Role::Owner,
            _ => Role::Admin,
        }
    }
}

/// A command together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// De-duplication key; redeliveries carry the same id.
    pub event_id: String,
    pub chat_id: ChatId,
    pub actor_id: UserId,
    pub kind: CommandKind,
    /// Author of the message the command replied to.
    pub reply_target: Option<UserId>,
    /// Whitespace-separated arguments after the command name.
    pub args: Vec<String>,
}

impl CommandRequest {
    /// The target user and the remaining arguments.
    ///
    /// A replied-to message wins; otherwise a leading numeric argument is
    /// taken as the target id.
    #[must_use]
    pub fn target_and_args(&self) -> (Option<UserId>, &[String]) {
        if self.reply_target.is_some() {
            return (self.reply_target, &self.args);
        }
        match self.args.split_first() {
            Some((first, rest)) => match first.parse::<UserId>() {
                Ok(id) => (Some(id), rest),
                Err(_) => (None, &self.args),
            },
            None => (None, &self.args),
        }
    }
}

/// A button press on a bot message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub event_id: String,
    /// Transport handle used to acknowledge the press.
    pub callback_id: String,
    pub chat_id: ChatId,
    pub actor_id: UserId,
    pub data: String,
}

/// Plain text, which may continue an open panel session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextMessage {
    pub event_id: String,
    pub chat_id: ChatId,
    pub actor_id: UserId,
    pub text: String,
}

/// Any event routed to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundEvent {
    Command(CommandRequest),
    Callback(CallbackRequest),
    Text(TextMessage),
}

impl InboundEvent {
    /// The chat whose ordered queue this event belongs to.
    #[must_use]
    pub const fn chat_id(&self) -> ChatId {
        match self {
            Self::Command(c) => c.chat_id,
            Self::Callback(c) => c.chat_id,
            Self::Text(t) => t.chat_id,
        }
    }

    #[must_use]
    pub fn event_id(&self) -> &str {
        match self {
            Self::Command(c) => &c.event_id,
            Self::Callback(c) => &c.event_id,
            Self::Text(t) => &t.event_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(reply_target: Option<UserId>, args: &[&str]) -> CommandRequest {
        CommandRequest {
            event_id: "tg:1".to_string(),
            chat_id: -100,
            actor_id: 1,
            kind: CommandKind::Mute,
            reply_target,
            args: args.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn test_parse_strips_bot_suffix() {
        assert_eq!(CommandKind::parse("warn@WardenBot"), Some(CommandKind::Warn));
        assert_eq!(CommandKind::parse("ResetWarns"), Some(CommandKind::ResetWarnings));
        assert_eq!(CommandKind::parse("imagine"), None);
    }

    #[test]
    fn test_required_roles() {
        assert_eq!(CommandKind::Warnings.required_role(), Role::Member);
        assert_eq!(CommandKind::Ban.required_role(), Role::Admin);
        assert_eq!(CommandKind::ResetWarnings.required_role(), Role::Owner);
    }

    #[test]
    fn test_reply_target_wins_over_arguments() {
        let cmd = command(Some(7), &["10m"]);
        let (target, args) = cmd.target_and_args();
        assert_eq!(target, Some(7));
        assert_eq!(args, ["10m".to_string()]);
    }

    #[test]
    fn test_numeric_argument_is_target() {
        let cmd = command(None, &["42", "2h"]);
        let (target, args) = cmd.target_and_args();
        assert_eq!(target, Some(42));
        assert_eq!(args, ["2h".to_string()]);

        let cmd = command(None, &["2h"]);
        assert_eq!(cmd.target_and_args().0, None);
    }
}
