//! Bot API HTTP client.

#![allow(missing_docs)]

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};
use warden_common::AppError;
use warden_common::config::BotConfig;

use crate::types::{
    ApiResponse, ChatMember, ChatPermissions, Ignored, InlineKeyboardMarkup, SendMessage, Update,
};

/// Error type for Bot API calls.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Bot API rejected {method}: {code} - {description}")]
    Api {
        method: &'static str,
        code: u16,
        description: String,
    },
    #[error("Bot API rate limited {method}, retry after {retry_after}s")]
    RateLimited {
        method: &'static str,
        retry_after: u64,
    },
    #[error("Bot API returned no result for {0}")]
    EmptyResult(&'static str),
}

impl TelegramError {
    /// Whether repeating the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited { .. } | Self::EmptyResult(_) => true,
            Self::Api { code, .. } => *code >= 500,
        }
    }
}

impl From<TelegramError> for AppError {
    fn from(err: TelegramError) -> Self {
        if err.is_retryable() {
            Self::Transport(err.to_string())
        } else {
            Self::EnforcementFailure(err.to_string())
        }
    }
}

/// Thin client over the Bot API methods the bot uses.
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
    poll_timeout: u64,
}

impl TelegramClient {
    /// Create a client for the configured bot.
    pub fn new(config: &BotConfig) -> Result<Self, TelegramError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.token
            ),
            poll_timeout: config.poll_timeout_secs,
        })
    }

    /// Invoke `method` with a JSON body.
    ///
    /// The token is part of the URL, so only the method name is logged.
    async fn call<P, R>(&self, method: &'static str, params: &P) -> Result<R, TelegramError>
    where
        P: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        debug!(method, "Calling Bot API");

        let response: ApiResponse<R> = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .json(params)
            .send()
            .await?
            .json()
            .await?;

        if response.ok {
            return response.result.ok_or(TelegramError::EmptyResult(method));
        }

        let code = response.error_code.unwrap_or_default();
        if let Some(retry_after) = response.parameters.and_then(|p| p.retry_after) {
            warn!(method, retry_after, "Bot API rate limit hit");
            return Err(TelegramError::RateLimited {
                method,
                retry_after,
            });
        }
        Err(TelegramError::Api {
            method,
            code,
            description: response.description.unwrap_or_default(),
        })
    }

    /// Long-poll for updates starting at `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, TelegramError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": self.poll_timeout,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_markup: Option<InlineKeyboardMarkup>,
    ) -> Result<(), TelegramError> {
        let body = SendMessage {
            chat_id,
            text,
            reply_markup,
        };
        self.call::<_, Ignored>("sendMessage", &body).await?;
        Ok(())
    }

    /// Stop the client-side spinner on a pressed button.
    pub async fn answer_callback_query(&self, callback_id: &str) -> Result<(), TelegramError> {
        self.call::<_, bool>(
            "answerCallbackQuery",
            &json!({ "callback_query_id": callback_id }),
        )
        .await?;
        Ok(())
    }

    pub async fn ban_chat_member(&self, chat_id: i64, user_id: i64) -> Result<(), TelegramError> {
        self.call::<_, bool>(
            "banChatMember",
            &json!({ "chat_id": chat_id, "user_id": user_id }),
        )
        .await?;
        Ok(())
    }

    /// Lift a ban. With `only_if_banned` a member who is not banned is left
    /// in the chat instead of being removed.
    pub async fn unban_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
        only_if_banned: bool,
    ) -> Result<(), TelegramError> {
        self.call::<_, bool>(
            "unbanChatMember",
            &json!({
                "chat_id": chat_id,
                "user_id": user_id,
                "only_if_banned": only_if_banned,
            }),
        )
        .await?;
        Ok(())
    }

    /// Replace a member's permissions, optionally until a unix timestamp.
    pub async fn restrict_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
        permissions: ChatPermissions,
        until_date: Option<i64>,
    ) -> Result<(), TelegramError> {
        let mut body = json!({
            "chat_id": chat_id,
            "user_id": user_id,
            "permissions": permissions,
            "use_independent_chat_permissions": true,
        });
        if let Some(until) = until_date {
            body["until_date"] = json!(until);
        }
        self.call::<_, bool>("restrictChatMember", &body).await?;
        Ok(())
    }

    pub async fn get_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<ChatMember, TelegramError> {
        self.call(
            "getChatMember",
            &json!({ "chat_id": chat_id, "user_id": user_id }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_errors_map_by_retryability() {
        let rejected = TelegramError::Api {
            method: "banChatMember",
            code: 400,
            description: "Bad Request: user is an administrator".to_string(),
        };
        assert!(matches!(
            AppError::from(rejected),
            AppError::EnforcementFailure(_)
        ));

        let limited = TelegramError::RateLimited {
            method: "sendMessage",
            retry_after: 3,
        };
        assert!(AppError::from(limited).is_transient());

        let upstream = TelegramError::Api {
            method: "getUpdates",
            code: 502,
            description: "Bad Gateway".to_string(),
        };
        assert!(upstream.is_retryable());
    }
}
