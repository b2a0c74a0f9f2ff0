//! Database integration tests.
//!
//! These tests require a running `PostgreSQL` instance.
//! Run with: `cargo test --test db_integration -- --ignored`
//!
//! Environment variables:
//!   `TEST_DB_HOST` (default: localhost)
//!   `TEST_DB_PORT` (default: 5433)
//!   `TEST_DB_USER` (default: `warden_test`)
//!   `TEST_DB_PASSWORD` (default: `warden_test`)
//!   `TEST_DB_NAME` (default: `warden_test`)

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use sea_orm::Set;
use serde_json::json;
use warden_db::entities::{action_log, conversation_session, infraction, processed_event};
use warden_db::repositories::{
    ActionLogRepository, ConversationSessionRepository, InfractionRepository,
    ProcessedEventRepository,
};
use warden_db::test_utils::{TestDatabase, TestDbConfig};

async fn database() -> Arc<sea_orm::DatabaseConnection> {
    let db = TestDatabase::new().await.unwrap();
    db.cleanup().await.unwrap();
    Arc::new(db.conn)
}

fn infraction(chat_id: i64, user_id: i64, warnings: i32) -> infraction::Model {
    infraction::Model {
        chat_id,
        user_id,
        warning_count: warnings,
        mute_until: None,
        ban_reason: None,
        updated_at: Utc::now().into(),
    }
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_infraction_upsert_and_mute_queries() {
    let repo = InfractionRepository::new(database().await);

    repo.upsert(infraction(-1, 7, 1)).await.unwrap();
    repo.upsert(infraction(-1, 7, 2)).await.unwrap();
    assert_eq!(repo.find(-1, 7).await.unwrap().unwrap().warning_count, 2);

    let mut muted = infraction(-2, 8, 0);
    muted.mute_until = Some((Utc::now() + Duration::minutes(5)).into());
    repo.upsert(muted).await.unwrap();

    assert_eq!(repo.find_chats_with_mutes().await.unwrap(), vec![-2]);
    assert_eq!(repo.find_muted(-2).await.unwrap().len(), 1);
    assert!(repo.find_muted(-1).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_empty_records_are_compacted() {
    let repo = InfractionRepository::new(database().await);

    repo.upsert(infraction(-1, 7, 0)).await.unwrap();
    repo.upsert(infraction(-1, 8, 1)).await.unwrap();

    assert_eq!(repo.find_empty_keys().await.unwrap(), vec![(-1, 7)]);
    assert!(repo.delete_if_empty(-1, 7).await.unwrap());
    assert!(!repo.delete_if_empty(-1, 8).await.unwrap());
    assert!(repo.find(-1, 8).await.unwrap().is_some());
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_expired_sessions_are_listed() {
    let repo = ConversationSessionRepository::new(database().await);
    let now = Utc::now();

    for (admin_id, expires_at) in [(1, now - Duration::seconds(1)), (2, now + Duration::minutes(5))] {
        repo.upsert(conversation_session::Model {
            chat_id: -1,
            admin_id,
            state: json!("AwaitingTargetUser"),
            collected_inputs: json!(["warn"]),
            expires_at: expires_at.into(),
            created_at: now.into(),
        })
        .await
        .unwrap();
    }

    assert_eq!(repo.find_expired_keys(now.into()).await.unwrap(), vec![(-1, 1)]);

    repo.delete(-1, 1).await.unwrap();
    assert!(repo.find(-1, 1).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_action_log_newest_first() {
    let repo = ActionLogRepository::new(database().await);

    for (id, action) in [("01a", "warn"), ("01b", "ban")] {
        repo.append(action_log::ActiveModel {
            id: Set(id.to_string()),
            actor_id: Set(1),
            action: Set(action.to_string()),
            target_id: Set(7),
            chat_id: Set(Some(-1)),
            detail: Set(None),
            created_at: Set(Utc::now().into()),
        })
        .await
        .unwrap();
    }

    let actions: Vec<String> = repo
        .find_by_chat(-1, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.action)
        .collect();
    assert_eq!(actions, vec!["ban".to_string(), "warn".to_string()]);
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_processed_event_keeps_first_outcome() {
    let repo = ProcessedEventRepository::new(database().await);
    let now = Utc::now();

    let first = processed_event::Model {
        event_id: "telegram:1".to_string(),
        outcome: json!({ "text": "first" }),
        created_at: (now - Duration::days(2)).into(),
    };
    assert!(repo.insert(first).await.unwrap());

    let second = processed_event::Model {
        event_id: "telegram:1".to_string(),
        outcome: json!({ "text": "second" }),
        created_at: now.into(),
    };
    assert!(!repo.insert(second).await.unwrap());

    let stored = repo.find("telegram:1").await.unwrap().unwrap();
    assert_eq!(stored.outcome["text"], "first");

    assert_eq!(
        repo.delete_older_than((now - Duration::days(1)).into()).await.unwrap(),
        1
    );
    assert!(repo.find("telegram:1").await.unwrap().is_none());
}

#[test]
fn test_config_from_env() {
    let config = TestDbConfig::default();
    assert!(!config.host.is_empty());
    assert!(config.port > 0);
    assert!(!config.username.is_empty());
    assert!(!config.database.is_empty());
}
