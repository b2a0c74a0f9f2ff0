//! Translation of Bot API updates into inbound events.

use tracing::{debug, warn};
use warden_common::IdGenerator;
use warden_core::{CallbackRequest, CommandKind, CommandRequest, InboundEvent, TextMessage};

use crate::client::{TelegramClient, TelegramError};
use crate::types::{Message, Update};

const SOURCE: &str = "telegram";

/// Turn an update into an event, or `None` if the bot has nothing to do
/// with it.
///
/// Updates from bots, updates without an author and commands the bot does
/// not know are dropped. Redeliveries of one update map to the same event
/// id.
#[must_use]
pub fn parse_update(update: &Update, ids: &IdGenerator) -> Option<InboundEvent> {
    let event_id = ids.event_id(SOURCE, update.update_id);

    if let Some(query) = &update.callback_query {
        let message = query.message.as_ref()?;
        if query.from.is_bot {
            return None;
        }
        return Some(InboundEvent::Callback(CallbackRequest {
            event_id,
            callback_id: query.id.clone(),
            chat_id: message.chat.id,
            actor_id: query.from.id,
            data: query.data.clone()?,
        }));
    }

    let message = update.message.as_ref()?;
    let author = message.from.as_ref().filter(|user| !user.is_bot)?;
    let text = message.text.as_deref()?.trim();

    if let Some(command) = text.strip_prefix('/') {
        return parse_command(event_id, message, author.id, command);
    }

    Some(InboundEvent::Text(TextMessage {
        event_id,
        chat_id: message.chat.id,
        actor_id: author.id,
        text: text.to_string(),
    }))
}

fn parse_command(
    event_id: String,
    message: &Message,
    actor_id: i64,
    command: &str,
) -> Option<InboundEvent> {
    let mut parts = command.split_whitespace();
    let kind = CommandKind::parse(parts.next()?)?;

    Some(InboundEvent::Command(CommandRequest {
        event_id,
        chat_id: message.chat.id,
        actor_id,
        kind,
        reply_target: message
            .reply_to_message
            .as_ref()
            .and_then(|reply| reply.from.as_ref())
            .map(|user| user.id),
        args: parts.map(ToString::to_string).collect(),
    }))
}

/// Long-polling update source that tracks the confirmed offset.
pub struct UpdatePoller {
    client: TelegramClient,
    ids: IdGenerator,
    offset: i64,
}

impl UpdatePoller {
    #[must_use]
    pub const fn new(client: TelegramClient) -> Self {
        Self {
            client,
            ids: IdGenerator::new(),
            offset: 0,
        }
    }

    /// Fetch the next batch of events.
    ///
    /// Every fetched update is confirmed on the next call, including those
    /// that produce no event.
    pub async fn poll(&mut self) -> Result<Vec<InboundEvent>, TelegramError> {
        let updates = self.client.get_updates(self.offset).await?;

        let mut events = Vec::with_capacity(updates.len());
        for update in &updates {
            self.offset = self.offset.max(update.update_id + 1);
            match parse_update(update, &self.ids) {
                Some(event) => events.push(event),
                None => debug!(update_id = update.update_id, "Ignoring update"),
            }
        }

        if !updates.is_empty() {
            debug!(count = events.len(), offset = self.offset, "Polled updates");
        }
        Ok(events)
    }

    /// Back-off to apply after a failed poll.
    #[must_use]
    pub fn backoff(err: &TelegramError) -> std::time::Duration {
        let secs = match err {
            TelegramError::RateLimited { retry_after, .. } => *retry_after,
            _ => 1,
        };
        warn!(error = %err, backoff_secs = secs, "Polling failed");
        std::time::Duration::from_secs(secs)
    }
}
