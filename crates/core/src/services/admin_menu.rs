//! The admin panel flow: pick an action, a target, a detail, then confirm.

use std::fmt;
use std::str::FromStr;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use warden_common::{AppError, AppResult};

use crate::services::conversation::{CANCEL_INPUT, FlowGraph, Pattern, Transition};
use crate::services::escalation::{ModerationEvent, parse_duration};
use crate::services::infraction_store::UserId;
use crate::services::messages::{Menu, MenuButton};

/// Callback prefix of the action buttons.
pub const ACTION_PREFIX: &str = "action:";

/// Input that leaves the detail at its default.
pub const SKIP_INPUT: &str = "skip";

/// Input that commits the collected action.
pub const CONFIRM_INPUT: &str = "confirm";

/// Reason recorded for a panel ban without one.
pub const DEFAULT_BAN_REASON: &str = "banned by an admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MenuState {
    MenuRoot,
    AwaitingTargetUser,
    AwaitingDetail,
    AwaitingConfirmation,
    Committed,
    Cancelled,
}

/// Actions offered by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PanelAction {
    Warn,
    Unwarn,
    Mute,
    Unmute,
    Ban,
    Unban,
    Kick,
}

impl PanelAction {
    pub const ALL: [Self; 7] = [
        Self::Warn,
        Self::Unwarn,
        Self::Mute,
        Self::Unmute,
        Self::Ban,
        Self::Unban,
        Self::Kick,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Unwarn => "unwarn",
            Self::Mute => "mute",
            Self::Unmute => "unmute",
            Self::Ban => "ban",
            Self::Unban => "unban",
            Self::Kick => "kick",
        }
    }

    /// Parse an action button's callback data, e.g. `action:ban`.
    #[must_use]
    pub fn from_callback(input: &str) -> Option<Self> {
        input.trim().strip_prefix(ACTION_PREFIX)?.parse().ok()
    }

    /// Build the moderation event for this action and an optional detail.
    pub fn to_event(self, detail: Option<&str>, default_mute: Duration) -> AppResult<ModerationEvent> {
        Ok(match self {
            Self::Warn => ModerationEvent::Warn,
            Self::Unwarn => ModerationEvent::Unwarn,
            Self::Mute => ModerationEvent::Mute {
                duration: match detail {
                    Some(text) => parse_duration(text).ok_or_else(|| {
                        AppError::BadRequest(format!("Invalid duration: {text}"))
                    })?,
                    None => default_mute,
                },
            },
            Self::Unmute => ModerationEvent::Unmute,
            Self::Ban => ModerationEvent::Ban {
                reason: detail.unwrap_or(DEFAULT_BAN_REASON).to_string(),
            },
            Self::Unban => ModerationEvent::Unban,
            Self::Kick => ModerationEvent::Kick,
        })
    }

    /// Check a detail input before it is accepted. Returns a re-prompt on
    /// failure.
    pub fn validate_detail(self, input: &str) -> Result<(), String> {
        let input = input.trim();
        if self == Self::Mute
            && !input.eq_ignore_ascii_case(SKIP_INPUT)
            && !input.eq_ignore_ascii_case(CANCEL_INPUT)
            && parse_duration(input).is_none()
        {
            return Err(format!(
                "\"{input}\" is not a duration. Use e.g. 30s, 10m, 2h or 1d, or skip."
            ));
        }
        Ok(())
    }
}

impl fmt::Display for PanelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PanelAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown action: {s}")))
    }
}

fn is_action_button(input: &str) -> bool {
    PanelAction::from_callback(input).is_some()
}

/// User ids are positive; group and channel ids are negative.
fn is_user_id(input: &str) -> bool {
    input.parse::<UserId>().is_ok_and(|id| id > 0)
}

/// The panel flow graph.
#[must_use]
pub fn admin_flow() -> FlowGraph<MenuState> {
    FlowGraph::new(MenuState::Cancelled)
        .edge(
            MenuState::MenuRoot,
            Transition::new(
                Pattern::Predicate(is_action_button),
                MenuState::AwaitingTargetUser,
            )
            .collect(),
        )
        .edge(
            MenuState::AwaitingTargetUser,
            Transition::new(Pattern::Predicate(is_user_id), MenuState::AwaitingDetail)
                .collect(),
        )
        .edge(
            MenuState::AwaitingDetail,
            Transition::new(Pattern::Any, MenuState::AwaitingConfirmation).collect(),
        )
        .edge(
            MenuState::AwaitingConfirmation,
            Transition::new(
                Pattern::Exact(CONFIRM_INPUT.to_string()),
                MenuState::Committed,
            ),
        )
        .terminal(MenuState::Committed)
        .hint(MenuState::MenuRoot, "Pick an action from the menu.")
        .hint(MenuState::AwaitingTargetUser, "Send the numeric id of the user.")
        .hint(MenuState::AwaitingConfirmation, "Press Confirm or Cancel.")
}

/// A fully collected panel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelRequest {
    pub action: PanelAction,
    pub target: UserId,
    pub detail: Option<String>,
}

impl PanelRequest {
    /// Rebuild the request from the inputs collected by [`admin_flow`].
    pub fn from_inputs(inputs: &[String]) -> AppResult<Self> {
        let [action, target, detail] = inputs else {
            return Err(AppError::Internal(format!(
                "panel collected {} inputs, expected 3",
                inputs.len()
            )));
        };

        let action = PanelAction::from_callback(action)
            .ok_or_else(|| AppError::Internal(format!("bad panel action: {action}")))?;
        let target = target
            .parse()
            .map_err(|_| AppError::Internal(format!("bad panel target: {target}")))?;
        let detail = (!detail.eq_ignore_ascii_case(SKIP_INPUT)).then(|| detail.clone());

        Ok(Self {
            action,
            target,
            detail,
        })
    }
}

const CANCEL_ROW: &[(&str, &str)] = &[("Cancel", CANCEL_INPUT)];

/// Prompt text and buttons shown for a state.
#[must_use]
pub fn prompt(state: MenuState, inputs: &[String]) -> (String, Option<Menu>) {
    let action = inputs
        .first()
        .and_then(|input| PanelAction::from_callback(input));

    match state {
        MenuState::MenuRoot => {
            let mut rows: Vec<Vec<MenuButton>> = PanelAction::ALL
                .chunks(3)
                .map(|chunk| {
                    chunk
                        .iter()
                        .map(|a| MenuButton::new(a.as_str(), format!("{ACTION_PREFIX}{a}")))
                        .collect()
                })
                .collect();
            rows.push(vec![MenuButton::new("Cancel", CANCEL_INPUT)]);
            ("Choose an action:".to_string(), Some(Menu { rows }))
        }
        MenuState::AwaitingTargetUser => (
            format!(
                "Send the id of the user to {}.",
                action.map_or("moderate", |a| a.as_str())
            ),
            Some(Menu::from_rows(&[CANCEL_ROW])),
        ),
        MenuState::AwaitingDetail => {
            let text = match action {
                Some(PanelAction::Mute) => "Send a mute duration (e.g. 10m, 2h, 1d), or skip.",
                Some(PanelAction::Ban | PanelAction::Warn) => "Send a reason, or skip.",
                _ => "Send a note for the log, or skip.",
            };
            (
                text.to_string(),
                Some(Menu::from_rows(&[&[("Skip", SKIP_INPUT), ("Cancel", CANCEL_INPUT)]])),
            )
        }
        MenuState::AwaitingConfirmation => {
            let target = inputs.get(1).map_or("?", String::as_str);
            let action = action.map_or("act on", |a| a.as_str());
            let detail = inputs
                .get(2)
                .filter(|d| !d.eq_ignore_ascii_case(SKIP_INPUT))
                .map(|d| format!(" ({d})"))
                .unwrap_or_default();
            (
                format!("Confirm: {action} user {target}{detail}?"),
                Some(Menu::from_rows(&[&[
                    ("Confirm", CONFIRM_INPUT),
                    ("Cancel", CANCEL_INPUT),
                ]])),
            )
        }
        MenuState::Committed => ("Done.".to_string(), None),
        MenuState::Cancelled => ("Panel closed.".to_string(), None),
    }
}
