// ABOUTME: Session-to-account merge performed at registration
// ABOUTME: Transfers session entries into account history idempotently, then deletes the session
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

//! # Merge Coordinator
//!
//! When a visitor registers, their ephemeral session history is folded into
//! the new account and the session is deleted. Transferred entries are tagged
//! with the originating session id, which makes the merge idempotent: a retry
//! after a failure between append and delete finds the tag and skips the
//! append instead of duplicating entries.

use tracing::{info, warn};

use crate::database::{AccountManager, SessionManager};
use crate::errors::AppResult;

/// Outcome of a merge attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No session id supplied or the session was absent/expired
    NothingToMerge,
    /// Entries were transferred and the session deleted
    Merged { entries: u64 },
    /// The account already held this session's entries; only cleanup ran
    AlreadyMerged,
}

/// Merge a session's entries into an account's history
///
/// Absent or expired sessions are a no-op. Failures are logged and reported
/// as `NothingToMerge` rather than propagated, so registration never fails
/// because of a merge problem.
pub async fn merge_session_into_account(
    sessions: &SessionManager,
    accounts: &AccountManager,
    account_id: &str,
    session_id: Option<&str>,
) -> MergeOutcome {
    let Some(session_id) = session_id else {
        return MergeOutcome::NothingToMerge;
    };

    match try_merge(sessions, accounts, account_id, session_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(
                session_id,
                account_id, "Session merge failed, registration continues: {e}"
            );
            MergeOutcome::NothingToMerge
        }
    }
}

async fn try_merge(
    sessions: &SessionManager,
    accounts: &AccountManager,
    account_id: &str,
    session_id: &str,
) -> AppResult<MergeOutcome> {
    if accounts.history_has_origin(account_id, session_id).await? {
        // A previous merge attempt already appended; only the session
        // deletion may still be outstanding.
        sessions.delete_session(session_id).await?;
        info!(session_id, account_id, "Session already merged, cleaned up");
        return Ok(MergeOutcome::AlreadyMerged);
    }

    let session = match sessions.get_session(session_id).await {
        Ok(session) => session,
        Err(e) if e.code == crate::errors::ErrorCode::ResourceNotFound => {
            return Ok(MergeOutcome::NothingToMerge);
        }
        Err(e) => return Err(e),
    };

    let appended = accounts
        .append_history(account_id, Some(session_id), &session.entries)
        .await?;

    sessions.delete_session(session_id).await?;

    info!(
        session_id,
        account_id,
        entries = appended,
        "Session merged into account history"
    );
    Ok(MergeOutcome::Merged { entries: appended })
}
