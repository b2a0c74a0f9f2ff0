//! Moderation controller.
//!
//! Turns inbound commands, button presses and sweep events into committed
//! state changes, enforcement requests and outbound messages. Every error
//! is recovered here and rendered as a message; nothing propagates as a
//! process-level fault.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{debug, error, info, warn};
use warden_common::config::ModerationConfig;
use warden_common::{AppError, AppResult};

use crate::services::admin_menu::{
    DEFAULT_BAN_REASON, MenuState, PanelAction, PanelRequest, admin_flow, prompt,
};
use crate::services::audit::{ActionKind, ActionLog, ActionLogEntry, SYSTEM_ACTOR};
use crate::services::clock::Clock;
use crate::services::collaborators::{Authorizer, EnforcementAction, Enforcer, Notifier, Role};
use crate::services::conversation::{AdvanceOutcome, ConversationEngine, SessionBackend, SessionKey};
use crate::services::dedup::{ProcessedEventBackend, ProcessedEvents};
use crate::services::escalation::{Decision, EscalationPolicy, ModerationEvent, parse_duration};
use crate::services::events::{
    CallbackRequest, CommandKind, CommandRequest, InboundEvent, TextMessage,
};
use crate::services::infraction_store::{ChatId, InfractionStore, UserId};
use crate::services::messages::{
    ENFORCEMENT_PENDING, OutboundMessage, describe_decision, describe_error, describe_noop,
    describe_status, describe_unmuted,
};
use crate::services::reconcile::{EnforcementJob, ReconciliationQueue, enforce_with_timeout};

/// Tunables of the controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub warn_threshold: u32,
    pub default_mute: Duration,
    pub session_ttl: Duration,
    pub enforcement_timeout: StdDuration,
    pub dedup_capacity: usize,
    pub dedup_retention: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&ModerationConfig::default())
    }
}

impl From<&ModerationConfig> for ControllerSettings {
    fn from(config: &ModerationConfig) -> Self {
        let to_chrono = |d: StdDuration| Duration::from_std(d).unwrap_or_else(|_| Duration::days(365));
        Self {
            warn_threshold: config.warn_threshold,
            default_mute: to_chrono(config.default_mute()),
            session_ttl: to_chrono(config.session_ttl()),
            enforcement_timeout: config.enforcement_timeout(),
            dedup_capacity: config.dedup_capacity,
            dedup_retention: to_chrono(config.dedup_retention()),
        }
    }
}

/// External collaborators the controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub authorizer: Arc<dyn Authorizer>,
    pub enforcer: Arc<dyn Enforcer>,
    pub notifier: Arc<dyn Notifier>,
    pub reconciliation: Arc<dyn ReconciliationQueue>,
    pub audit: Arc<dyn ActionLog>,
}

/// Orchestrates moderation for all chats.
pub struct ModerationController {
    store: Arc<InfractionStore>,
    policy: EscalationPolicy,
    panel: ConversationEngine<MenuState>,
    collaborators: Collaborators,
    processed: ProcessedEvents<OutboundMessage>,
    clock: Arc<dyn Clock>,
    settings: ControllerSettings,
}

impl ModerationController {
    #[must_use]
    pub fn new(
        store: Arc<InfractionStore>,
        sessions: Arc<dyn SessionBackend>,
        processed: Arc<dyn ProcessedEventBackend>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            store,
            policy: EscalationPolicy::new(settings.warn_threshold),
            panel: ConversationEngine::new(
                admin_flow(),
                sessions,
                clock.clone(),
                settings.session_ttl,
            ),
            collaborators,
            processed: ProcessedEvents::new(processed, settings.dedup_capacity),
            clock,
            settings,
        }
    }

    /// The admin panel engine, for the session sweep.
    #[must_use]
    pub const fn panel(&self) -> &ConversationEngine<MenuState> {
        &self.panel
    }

    /// Forget handled event outcomes older than the retention period.
    pub async fn purge_processed_events(&self) -> AppResult<u64> {
        let cutoff = self.clock.now() - self.settings.dedup_retention;
        self.processed.purge_before(cutoff).await
    }

    /// Handle any inbound event and deliver the reply, if there is one.
    ///
    /// Delivery failures are logged and never undo committed state.
    pub async fn dispatch(&self, event: &InboundEvent) {
        let reply = match event {
            InboundEvent::Command(cmd) => Some(self.handle_command(cmd).await),
            InboundEvent::Callback(cb) => Some(self.handle_callback(cb).await),
            InboundEvent::Text(msg) => self.handle_text(msg).await,
        };

        if let Some(reply) = reply {
            self.deliver(&reply).await;
        }
    }

    /// Handle a moderation command.
    pub async fn handle_command(&self, cmd: &CommandRequest) -> OutboundMessage {
        if let Err(e) = self.authorize(cmd.chat_id, cmd.actor_id, cmd.kind.required_role()).await {
            return self.recover(&cmd.event_id, cmd.chat_id, &e);
        }

        if cmd.kind == CommandKind::Warnings {
            return match self.status(cmd).await {
                Ok(reply) => reply,
                Err(e) => self.recover(&cmd.event_id, cmd.chat_id, &e),
            };
        }

        self.once(&cmd.event_id, cmd.chat_id, || self.run_command(cmd))
            .await
    }

    /// Handle a button press on a panel message.
    pub async fn handle_callback(&self, cb: &CallbackRequest) -> OutboundMessage {
        if let Err(e) = self.authorize(cb.chat_id, cb.actor_id, Role::Admin).await {
            return self.recover(&cb.event_id, cb.chat_id, &e);
        }

        self.once(&cb.event_id, cb.chat_id, || {
            self.advance_panel(SessionKey::new(cb.chat_id, cb.actor_id), &cb.data)
        })
        .await
    }

    /// Handle plain text. Only text continuing an open panel gets a reply.
    pub async fn handle_text(&self, msg: &TextMessage) -> Option<OutboundMessage> {
        let key = SessionKey::new(msg.chat_id, msg.actor_id);
        match self.panel.current(key).await {
            Ok(Some(_)) => {}
            Ok(None) => return None,
            Err(e) => return Some(self.recover(&msg.event_id, msg.chat_id, &e)),
        }

        if let Err(e) = self.authorize(msg.chat_id, msg.actor_id, Role::Admin).await {
            return Some(self.recover(&msg.event_id, msg.chat_id, &e));
        }

        Some(
            self.once(&msg.event_id, msg.chat_id, || self.advance_panel(key, &msg.text))
                .await,
        )
    }

    /// Announce an expired mute and lift it on the platform.
    pub async fn handle_unmute_event(&self, chat_id: ChatId, user_id: UserId) -> OutboundMessage {
        self.record_action(SYSTEM_ACTOR, ActionKind::Unmute, chat_id, user_id, Some("expired".to_string()))
            .await;

        let mut text = describe_unmuted(user_id);
        if self
            .enforce(chat_id, user_id, EnforcementAction::Unmute)
            .await
            .is_err()
        {
            text.push(' ');
            text.push_str(ENFORCEMENT_PENDING);
        }
        OutboundMessage::text(chat_id, text)
    }

    /// Send a message, logging failures.
    pub async fn deliver(&self, message: &OutboundMessage) {
        if let Err(e) = self.collaborators.notifier.notify(message).await {
            warn!(chat_id = message.chat_id, error = %e, "Failed to deliver message");
        }
    }

    async fn authorize(&self, chat_id: ChatId, actor_id: UserId, required: Role) -> AppResult<()> {
        if self
            .collaborators
            .authorizer
            .is_authorized(chat_id, actor_id, required)
            .await?
        {
            Ok(())
        } else {
            Err(AppError::Unauthorized)
        }
    }

    /// Run `work` at most once per event id.
    ///
    /// A redelivered event gets the outcome recorded the first time, also
    /// across restarts. Outcomes of transient failures are not recorded, so
    /// a redelivery retries; an unreadable ledger counts as transient.
    async fn once<F, Fut>(&self, event_id: &str, chat_id: ChatId, work: F) -> OutboundMessage
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<OutboundMessage>>,
    {
        let _claim = self.processed.claim(event_id).await;
        match self.processed.lookup(event_id).await {
            Ok(Some(previous)) => {
                debug!(event_id, chat_id, "Duplicate event, returning previous outcome");
                return previous;
            }
            Ok(None) => {}
            Err(e) => return self.recover(event_id, chat_id, &e),
        }

        let reply = match work().await {
            Ok(reply) => reply,
            Err(e) if e.is_transient() => return self.recover(event_id, chat_id, &e),
            Err(e) => self.recover(event_id, chat_id, &e),
        };

        if let Err(e) = self
            .processed
            .record(event_id, reply.clone(), self.clock.now())
            .await
        {
            warn!(event_id, chat_id, error = %e, "Failed to persist event outcome");
        }
        reply
    }

    /// Log an error by severity and render it for the user.
    fn recover(&self, event_id: &str, chat_id: ChatId, e: &AppError) -> OutboundMessage {
        if e.is_server_error() {
            error!(event_id, chat_id, code = e.error_code(), error = %e, "Event dropped");
        } else if matches!(e, AppError::Unauthorized | AppError::Transport(_)) {
            warn!(event_id, chat_id, code = e.error_code(), error = %e, "Event rejected");
        } else {
            debug!(event_id, chat_id, code = e.error_code(), error = %e, "Event rejected");
        }
        OutboundMessage::text(chat_id, describe_error(e))
    }

    async fn run_command(&self, cmd: &CommandRequest) -> AppResult<OutboundMessage> {
        let (target, args) = cmd.target_and_args();

        match cmd.kind {
            CommandKind::Panel => {
                let key = SessionKey::new(cmd.chat_id, cmd.actor_id);
                let session = self.panel.start(key, MenuState::MenuRoot).await?;
                let (text, menu) = prompt(session.state, &session.inputs);
                Ok(OutboundMessage::text(cmd.chat_id, text).with_menu(menu))
            }
            CommandKind::ResetWarnings => {
                let target = self
                    .validate_target(cmd.chat_id, cmd.actor_id, target, false)
                    .await?;
                let removed = self.store.reset(cmd.chat_id, target).await?;
                if removed {
                    info!(chat_id = cmd.chat_id, user_id = target, actor_id = cmd.actor_id, "Infraction record reset");
                    self.record_action(cmd.actor_id, ActionKind::Reset, cmd.chat_id, target, None)
                        .await;
                }
                Ok(OutboundMessage::text(
                    cmd.chat_id,
                    format!("Warnings of user {target} have been reset."),
                ))
            }
            kind => {
                let event = self.command_event(kind, args)?;
                let target = self
                    .validate_target(cmd.chat_id, cmd.actor_id, target, event.is_punitive())
                    .await?;
                let detail = (!args.is_empty()).then(|| args.join(" "));
                self.apply(cmd.chat_id, cmd.actor_id, target, event, detail)
                    .await
            }
        }
    }

    async fn status(&self, cmd: &CommandRequest) -> AppResult<OutboundMessage> {
        let target = cmd.target_and_args().0.unwrap_or(cmd.actor_id);
        let record = self.store.get(cmd.chat_id, target).await?;
        Ok(OutboundMessage::text(
            cmd.chat_id,
            describe_status(&record, self.policy.threshold(), self.clock.now()),
        ))
    }

    fn command_event(&self, kind: CommandKind, args: &[String]) -> AppResult<ModerationEvent> {
        Ok(match kind {
            CommandKind::Warn => ModerationEvent::Warn,
            CommandKind::Unwarn => ModerationEvent::Unwarn,
            CommandKind::Mute => ModerationEvent::Mute {
                duration: match args.first() {
                    Some(arg) => parse_duration(arg).ok_or_else(|| {
                        AppError::BadRequest(
                            "Usage: /mute [duration], e.g. /mute 10m or /mute 2h.".to_string(),
                        )
                    })?,
                    None => self.settings.default_mute,
                },
            },
            CommandKind::Unmute => ModerationEvent::Unmute,
            CommandKind::Ban => ModerationEvent::Ban {
                reason: if args.is_empty() {
                    DEFAULT_BAN_REASON.to_string()
                } else {
                    args.join(" ")
                },
            },
            CommandKind::Unban => ModerationEvent::Unban,
            CommandKind::Kick => ModerationEvent::Kick,
            CommandKind::ResetWarnings | CommandKind::Warnings | CommandKind::Panel => {
                return Err(AppError::Internal(format!("{kind:?} is not a moderation event")));
            }
        })
    }

    async fn validate_target(
        &self,
        chat_id: ChatId,
        actor_id: UserId,
        target: Option<UserId>,
        punitive: bool,
    ) -> AppResult<UserId> {
        let target = target.ok_or_else(|| {
            AppError::InvalidTarget(
                "Reply to a message from the user, or pass their numeric id.".to_string(),
            )
        })?;

        if target == actor_id {
            return Err(AppError::InvalidTarget("You cannot moderate yourself.".to_string()));
        }

        if punitive
            && self
                .collaborators
                .authorizer
                .is_authorized(chat_id, target, Role::Admin)
                .await?
        {
            return Err(AppError::InvalidTarget("Admins cannot be moderated.".to_string()));
        }

        Ok(target)
    }

    /// Decide, commit, log and enforce one moderation event.
    async fn apply(
        &self,
        chat_id: ChatId,
        actor_id: UserId,
        target: UserId,
        event: ModerationEvent,
        detail: Option<String>,
    ) -> AppResult<OutboundMessage> {
        let now = self.clock.now();
        let policy = self.policy;
        let (mutation, decision) = self
            .store
            .mutate_with(chat_id, target, |record| {
                let decision = policy.decide(record, &event, now);
                (decision.apply(record), decision)
            })
            .await?;

        let Some(kind) = decision.action_kind() else {
            debug!(chat_id, user_id = target, ?event, "No-op decision");
            return Ok(OutboundMessage::text(chat_id, describe_noop(&mutation.before)));
        };

        info!(
            chat_id,
            user_id = target,
            actor_id,
            action = kind.as_str(),
            warnings = mutation.after.warning_count,
            "Moderation action committed"
        );

        let detail = match &decision {
            Decision::AutoBan(reason) => Some(reason.clone()),
            Decision::Mute { until } => Some(format!("until {}", until.to_rfc3339())),
            _ => detail,
        };
        self.record_action(actor_id, kind, chat_id, target, detail).await;

        let mut text = describe_decision(&decision, target, self.policy.threshold());
        if let Some(action) = decision.enforcement() {
            if self.enforce(chat_id, target, action).await.is_err() {
                text.push(' ');
                text.push_str(ENFORCEMENT_PENDING);
            }
        }
        Ok(OutboundMessage::text(chat_id, text))
    }

    /// Enforce with a bounded wait; on failure hand the call to reconciliation.
    async fn enforce(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        action: EnforcementAction,
    ) -> AppResult<()> {
        let job = EnforcementJob {
            chat_id,
            user_id,
            action,
        };

        let Err(e) = enforce_with_timeout(
            self.collaborators.enforcer.as_ref(),
            &job,
            self.settings.enforcement_timeout,
        )
        .await
        else {
            return Ok(());
        };

        warn!(chat_id, user_id, action = action.name(), error = %e, "Enforcement failed, queued for reconciliation");
        if let Err(queue_err) = self.collaborators.reconciliation.enqueue(job).await {
            warn!(chat_id, user_id, action = action.name(), error = %queue_err, "Reconciliation queue rejected job");
        }
        Err(AppError::EnforcementFailure(e.to_string()))
    }

    async fn record_action(
        &self,
        actor_id: UserId,
        kind: ActionKind,
        chat_id: ChatId,
        target_id: UserId,
        detail: Option<String>,
    ) {
        let entry = ActionLogEntry {
            at: self.clock.now(),
            actor_id,
            kind,
            target_id,
            chat_id: Some(chat_id),
            detail,
        };
        if let Err(e) = self.collaborators.audit.append(entry).await {
            warn!(chat_id, user_id = target_id, action = kind.as_str(), error = %e, "Failed to append action log entry");
        }
    }

    async fn advance_panel(&self, key: SessionKey, input: &str) -> AppResult<OutboundMessage> {
        if let Some(session) = self.panel.current(key).await? {
            if session.state == MenuState::AwaitingDetail {
                let action = session
                    .inputs
                    .first()
                    .and_then(|first| PanelAction::from_callback(first));
                if let Some(action) = action {
                    action.validate_detail(input).map_err(AppError::SessionRejected)?;
                }
            }
        }

        match self.panel.advance(key, input).await? {
            AdvanceOutcome::Transitioned { state, inputs } => {
                let (text, menu) = prompt(state, &inputs);
                Ok(OutboundMessage::text(key.chat_id, text).with_menu(menu))
            }
            AdvanceOutcome::Rejected(hint) => {
                debug!(chat_id = key.chat_id, admin_id = key.admin_id, input, "Panel input rejected");
                let menu = self
                    .panel
                    .current(key)
                    .await?
                    .and_then(|session| prompt(session.state, &session.inputs).1);
                Ok(OutboundMessage::text(key.chat_id, hint).with_menu(menu))
            }
            AdvanceOutcome::Cancelled => {
                let (text, _) = prompt(MenuState::Cancelled, &[]);
                Ok(OutboundMessage::text(key.chat_id, text))
            }
            AdvanceOutcome::Expired => Err(AppError::SessionExpired),
            AdvanceOutcome::Completed { inputs, .. } => {
                let request = PanelRequest::from_inputs(&inputs)?;
                let event = request
                    .action
                    .to_event(request.detail.as_deref(), self.settings.default_mute)?;
                let target = self
                    .validate_target(key.chat_id, key.admin_id, Some(request.target), event.is_punitive())
                    .await?;
                self.apply(key.chat_id, key.admin_id, target, event, request.detail)
                    .await
            }
        }
    }
}
