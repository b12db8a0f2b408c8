// ABOUTME: Integration tests for ephemeral session storage
// ABOUTME: Covers session lifecycle, entry ordering, point updates, and expiry sweeps
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use anyhow::Result;
use stretch_coach::database::sessions::EntryField;
use stretch_coach::database::Database;
use stretch_coach::errors::ErrorCode;
use stretch_coach::models::{Gender, UserInput};
use tempfile::TempDir;

/// Create a file-backed test database in a temp directory
///
/// The directory guard must be kept alive for the duration of the test.
async fn create_test_db() -> Result<(Database, TempDir)> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite:{}/test.db", dir.path().display());
    let db = Database::new(&url).await?;
    Ok((db, dir))
}

fn sample_input(description: &str) -> UserInput {
    UserInput {
        age: 28,
        gender: Gender::Female,
        occupation: "사무직 회사원".into(),
        lifestyle: "주 5일 근무, 하루 8시간 앉아서 일함".into(),
        selected_body_parts: "목, 어깨".into(),
        pain_level: 7,
        pain_description: description.into(),
    }
}

#[tokio::test]
async fn test_create_and_get_session() -> Result<()> {
    let (db, _dir) = create_test_db().await?;
    let sessions = db.sessions();

    let created = sessions.create_session("session-1", 24).await?;
    assert_eq!(created.session_id, "session-1");
    assert!(created.entries.is_empty());

    let fetched = sessions.get_session("session-1").await?;
    assert_eq!(fetched.session_id, "session-1");
    assert!(fetched.expires_at > fetched.created_at);
    Ok(())
}

#[tokio::test]
async fn test_duplicate_session_id_rejected() -> Result<()> {
    let (db, _dir) = create_test_db().await?;
    let sessions = db.sessions();

    sessions.create_session("session-1", 24).await?;
    let err = sessions.create_session("session-1", 24).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceAlreadyExists);
    Ok(())
}

#[tokio::test]
async fn test_expired_session_behaves_absent() -> Result<()> {
    let (db, _dir) = create_test_db().await?;
    let sessions = db.sessions();

    // Negative TTL places the expiry in the past
    sessions.create_session("expired", -1).await?;

    let err = sessions.get_session("expired").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);

    let err = sessions
        .append_entry("expired", &sample_input("장시간 컴퓨터 작업으로 인한 통증"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);
    Ok(())
}

#[tokio::test]
async fn test_entries_kept_in_append_order() -> Result<()> {
    let (db, _dir) = create_test_db().await?;
    let sessions = db.sessions();
    sessions.create_session("session-1", 24).await?;

    let first = sessions
        .append_entry("session-1", &sample_input("목이 뻐근하고 움직일 때 아픔"))
        .await?;
    let second = sessions
        .append_entry("session-1", &sample_input("어깨가 결리고 무거운 느낌이 있음"))
        .await?;
    let third = sessions
        .append_entry("session-1", &sample_input("허리가 아파서 오래 앉기 힘듦"))
        .await?;

    let session = sessions.get_session("session-1").await?;
    let ids: Vec<&str> = session.entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec![first.id.as_str(), second.id.as_str(), third.id.as_str()]);
    Ok(())
}

#[tokio::test]
async fn test_update_entry_fields() -> Result<()> {
    let (db, _dir) = create_test_db().await?;
    let sessions = db.sessions();
    sessions.create_session("session-1", 24).await?;
    let entry = sessions
        .append_entry("session-1", &sample_input("장시간 컴퓨터 작업으로 인한 통증"))
        .await?;

    let updated = sessions
        .update_entry_field("session-1", &entry.id, EntryField::AiResponse, "guide text")
        .await?;
    assert!(updated);

    let updated = sessions
        .update_entry_field("session-1", &entry.id, EntryField::Feedback, "도움이 되었어요")
        .await?;
    assert!(updated);

    let session = sessions.get_session("session-1").await?;
    assert_eq!(session.entries[0].ai_response.as_deref(), Some("guide text"));
    assert_eq!(
        session.entries[0].feedback.as_deref(),
        Some("도움이 되었어요")
    );
    Ok(())
}

#[tokio::test]
async fn test_update_nonmatching_pair_is_noop() -> Result<()> {
    let (db, _dir) = create_test_db().await?;
    let sessions = db.sessions();
    sessions.create_session("session-1", 24).await?;
    sessions.create_session("session-2", 24).await?;
    let entry = sessions
        .append_entry("session-1", &sample_input("장시간 컴퓨터 작업으로 인한 통증"))
        .await?;

    // Entry belongs to session-1, so updating through session-2 touches nothing
    let updated = sessions
        .update_entry_field("session-2", &entry.id, EntryField::Feedback, "x")
        .await?;
    assert!(!updated);

    let session = sessions.get_session("session-1").await?;
    assert!(session.entries[0].feedback.is_none());
    Ok(())
}

#[tokio::test]
async fn test_delete_session_with_entries() -> Result<()> {
    let (db, _dir) = create_test_db().await?;
    let sessions = db.sessions();
    sessions.create_session("session-1", 24).await?;
    sessions
        .append_entry("session-1", &sample_input("장시간 컴퓨터 작업으로 인한 통증"))
        .await?;

    assert!(sessions.delete_session("session-1").await?);
    // Deleting an absent session is a no-op, not an error
    assert!(!sessions.delete_session("session-1").await?);

    let err = sessions.get_session("session-1").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);
    Ok(())
}

#[tokio::test]
async fn test_sweep_removes_only_expired_sessions() -> Result<()> {
    let (db, _dir) = create_test_db().await?;
    let sessions = db.sessions();

    sessions.create_session("live", 24).await?;
    sessions.create_session("dead-1", -1).await?;
    sessions.create_session("dead-2", -2).await?;

    let removed = sessions.sweep_expired().await?;
    assert_eq!(removed, 2);

    assert!(sessions.get_session("live").await.is_ok());

    // A second sweep finds nothing left
    assert_eq!(sessions.sweep_expired().await?, 0);
    Ok(())
}
