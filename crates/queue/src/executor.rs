//! Scheduled job executor backed by the moderation services.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;
use warden_common::AppResult;
use warden_core::{InfractionStore, ModerationController, MuteSweeper};

use crate::scheduler::JobExecutor;

/// Runs the periodic moderation jobs.
pub struct ModerationJobs {
    sweeper: MuteSweeper,
    store: Arc<InfractionStore>,
    controller: Arc<ModerationController>,
}

impl ModerationJobs {
    #[must_use]
    pub const fn new(
        sweeper: MuteSweeper,
        store: Arc<InfractionStore>,
        controller: Arc<ModerationController>,
    ) -> Self {
        Self {
            sweeper,
            store,
            controller,
        }
    }
}

#[async_trait]
impl JobExecutor for ModerationJobs {
    /// Each cleared mute is handed to the controller, which lifts it on the
    /// platform and announces it in the chat.
    async fn sweep_expired_mutes(&self) -> AppResult<u64> {
        let unmuted = self.sweeper.sweep().await?;
        for event in &unmuted {
            let message = self
                .controller
                .handle_unmute_event(event.chat_id, event.user_id)
                .await;
            self.controller.deliver(&message).await;
        }
        Ok(unmuted.len() as u64)
    }

    async fn sweep_expired_sessions(&self) -> AppResult<u64> {
        self.controller.panel().sweep_expired().await
    }

    /// Removes empty infraction records, then handled-event outcomes past
    /// their retention.
    async fn compact_store(&self) -> AppResult<u64> {
        let records = self.store.compact().await?;
        let outcomes = self.controller.purge_processed_events().await?;
        debug!(records, outcomes, "Compaction finished");
        Ok(records + outcomes)
    }
}
