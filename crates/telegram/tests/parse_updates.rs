//! Update parsing tests against recorded Bot API payloads.

#![allow(clippy::unwrap_used)]

use serde_json::json;
use warden_common::IdGenerator;
use warden_core::{CommandKind, InboundEvent};
use warden_telegram::parse_update;
use warden_telegram::types::{ApiResponse, Update};

fn update(value: serde_json::Value) -> Update {
    serde_json::from_value(value).unwrap()
}

fn parse(value: serde_json::Value) -> Option<InboundEvent> {
    parse_update(&update(value), &IdGenerator::new())
}

#[test]
fn test_reply_command_targets_replied_author() {
    let event = parse(json!({
        "update_id": 901,
        "message": {
            "message_id": 5,
            "chat": { "id": -1001, "type": "supergroup" },
            "from": { "id": 10, "is_bot": false, "username": "mod" },
            "text": "/mute@WardenBot 10m",
            "reply_to_message": {
                "message_id": 4,
                "chat": { "id": -1001, "type": "supergroup" },
                "from": { "id": 7, "is_bot": false },
                "text": "spam"
            }
        }
    }))
    .unwrap();

    let InboundEvent::Command(cmd) = event else {
        panic!("expected a command, got {event:?}");
    };
    assert_eq!(cmd.event_id, "telegram:901");
    assert_eq!(cmd.chat_id, -1001);
    assert_eq!(cmd.actor_id, 10);
    assert_eq!(cmd.kind, CommandKind::Mute);
    assert_eq!(cmd.reply_target, Some(7));
    assert_eq!(cmd.args, vec!["10m".to_string()]);
}

#[test]
fn test_unknown_command_and_bot_messages_are_ignored() {
    assert!(
        parse(json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "chat": { "id": -1, "type": "group" },
                "from": { "id": 10, "is_bot": false },
                "text": "/start"
            }
        }))
        .is_none()
    );

    assert!(
        parse(json!({
            "update_id": 2,
            "message": {
                "message_id": 2,
                "chat": { "id": -1, "type": "group" },
                "from": { "id": 99, "is_bot": true },
                "text": "/warn 7"
            }
        }))
        .is_none()
    );
}

#[test]
fn test_plain_text_and_callbacks() {
    let text = parse(json!({
        "update_id": 3,
        "message": {
            "message_id": 3,
            "chat": { "id": -1, "type": "group" },
            "from": { "id": 10, "is_bot": false },
            "text": "  42  "
        }
    }))
    .unwrap();
    let InboundEvent::Text(msg) = text else {
        panic!("expected text, got {text:?}");
    };
    assert_eq!(msg.text, "42");

    let callback = parse(json!({
        "update_id": 4,
        "callback_query": {
            "id": "cbq-1",
            "from": { "id": 10, "is_bot": false },
            "message": {
                "message_id": 8,
                "chat": { "id": -1, "type": "group" },
                "from": { "id": 555, "is_bot": true },
                "text": "Choose an action:"
            },
            "data": "action:warn"
        }
    }))
    .unwrap();
    let InboundEvent::Callback(cb) = callback else {
        panic!("expected a callback, got {callback:?}");
    };
    assert_eq!(cb.callback_id, "cbq-1");
    assert_eq!(cb.chat_id, -1);
    assert_eq!(cb.actor_id, 10);
    assert_eq!(cb.data, "action:warn");
}

#[test]
fn test_error_envelope_carries_retry_after() {
    let response: ApiResponse<Vec<Update>> = serde_json::from_value(json!({
        "ok": false,
        "error_code": 429,
        "description": "Too Many Requests: retry after 5",
        "parameters": { "retry_after": 5 }
    }))
    .unwrap();

    assert!(!response.ok);
    assert!(response.result.is_none());
    assert_eq!(response.parameters.unwrap().retry_after, Some(5));
}
