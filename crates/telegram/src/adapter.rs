//! Moderation collaborators backed by the Bot API.

use async_trait::async_trait;
use tracing::info;
use warden_common::AppResult;
use warden_core::{
    Authorizer, ChatId, EnforcementAction, Enforcer, Menu, Notifier, OutboundMessage, Role, UserId,
};

use crate::client::TelegramClient;
use crate::types::{ChatPermissions, InlineKeyboardButton, InlineKeyboardMarkup};

/// Map a `getChatMember` status to a moderation role.
#[must_use]
pub fn role_for_status(status: &str) -> Role {
    match status {
        "creator" => Role::Owner,
        "administrator" => Role::Admin,
        _ => Role::Member,
    }
}

/// Render a menu as an inline keyboard.
#[must_use]
pub fn keyboard(menu: &Menu) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: menu
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|button| InlineKeyboardButton {
                        text: button.label.clone(),
                        callback_data: button.data.clone(),
                    })
                    .collect()
            })
            .collect(),
    }
}

/// Authorizer, enforcer and notifier over one bot account.
#[derive(Clone)]
pub struct TelegramGateway {
    client: TelegramClient,
}

impl TelegramGateway {
    #[must_use]
    pub const fn new(client: TelegramClient) -> Self {
        Self { client }
    }

    #[must_use]
    pub const fn client(&self) -> &TelegramClient {
        &self.client
    }
}

#[async_trait]
impl Authorizer for TelegramGateway {
    async fn is_authorized(
        &self,
        chat_id: ChatId,
        actor_id: UserId,
        required: Role,
    ) -> AppResult<bool> {
        if required == Role::Member {
            return Ok(true);
        }
        let member = self.client.get_chat_member(chat_id, actor_id).await?;
        Ok(role_for_status(&member.status) >= required)
    }
}

#[async_trait]
impl Enforcer for TelegramGateway {
    async fn enforce(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        action: &EnforcementAction,
    ) -> AppResult<()> {
        match action {
            EnforcementAction::Ban => self.client.ban_chat_member(chat_id, user_id).await?,
            EnforcementAction::Unban => {
                self.client
                    .unban_chat_member(chat_id, user_id, true)
                    .await?;
            }
            EnforcementAction::Kick => {
                // A kick is a ban immediately lifted so the user may rejoin.
                self.client.ban_chat_member(chat_id, user_id).await?;
                self.client
                    .unban_chat_member(chat_id, user_id, true)
                    .await?;
            }
            EnforcementAction::Mute { until } => {
                self.client
                    .restrict_chat_member(
                        chat_id,
                        user_id,
                        ChatPermissions::muted(),
                        Some(until.timestamp()),
                    )
                    .await?;
            }
            EnforcementAction::Unmute => {
                self.client
                    .restrict_chat_member(chat_id, user_id, ChatPermissions::member(), None)
                    .await?;
            }
        }
        info!(chat_id, user_id, action = action.name(), "Enforced on platform");
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramGateway {
    async fn notify(&self, message: &OutboundMessage) -> AppResult<()> {
        self.client
            .send_message(
                message.chat_id,
                &message.text,
                message.menu.as_ref().map(keyboard),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_for_status() {
        assert_eq!(role_for_status("creator"), Role::Owner);
        assert_eq!(role_for_status("administrator"), Role::Admin);
        assert_eq!(role_for_status("member"), Role::Member);
        assert_eq!(role_for_status("restricted"), Role::Member);
        assert_eq!(role_for_status("left"), Role::Member);
    }

    #[test]
    fn test_keyboard_keeps_layout() {
        let menu = Menu::from_rows(&[
            &[("Warn", "action:warn"), ("Mute", "action:mute")],
            &[("Cancel", "cancel")],
        ]);

        let markup = keyboard(&menu);

        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0][1].text, "Mute");
        assert_eq!(markup.inline_keyboard[0][1].callback_data, "action:mute");
        assert_eq!(markup.inline_keyboard[1][0].callback_data, "cancel");
    }
}
