// ABOUTME: HTTP routes for account registration and stretching history
// ABOUTME: Registration triggers the session-to-account merge; history is paginated
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::session_id_from_cookies;
use crate::database::accounts::AccountProfile;
use crate::errors::AppError;
use crate::models::{Account, Gender, StretchingEntry};
use crate::server::ServerResources;
use crate::services::merge::{merge_session_into_account, MergeOutcome};

/// Minimum accepted password length
const MIN_PASSWORD_LENGTH: usize = 8;

/// Default history page size
const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Maximum history page size
const MAX_HISTORY_LIMIT: i64 = 200;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Body for account registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub age: Option<u8>,
    #[serde(default)]
    pub gender: Option<Gender>,
    #[serde(default)]
    pub occupation: Option<String>,
    #[serde(default)]
    pub lifestyle: Option<String>,
    /// Session to merge, overrides the cookie when present
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Response to account registration
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub account: Account,
    /// How many session entries were transferred into the history
    pub merged_entries: u64,
}

/// Query parameters for history pagination
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Response for a history page
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub entries: Vec<StretchingEntry>,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// Routes
// ============================================================================

/// Account registration and history routes
pub struct AccountRoutes;

impl AccountRoutes {
    /// Create all account routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/v1/accounts", post(Self::register))
            .route(
                "/api/v1/accounts/:account_id/history",
                get(Self::get_history),
            )
            .with_state(resources)
    }

    /// Register an account and merge any prior session history
    async fn register(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(request): Json<RegisterRequest>,
    ) -> Result<impl IntoResponse, AppError> {
        let email = request.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::invalid_input("email is not valid"));
        }
        if request.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::invalid_input(format!(
                "password must be at least {MIN_PASSWORD_LENGTH} characters"
            )));
        }

        let mut profile = AccountProfile {
            age: request.age,
            gender: request.gender,
            occupation: request.occupation,
            lifestyle: request.lifestyle,
        };

        let session_id = request
            .session_id
            .or_else(|| session_id_from_cookies(&headers));

        // Profile fields the caller left out are taken from the most recent
        // questionnaire of the session being merged.
        if let Some(session_id) = session_id.as_deref() {
            if let Ok(session) = resources.sessions.get_session(session_id).await {
                if let Some(latest) = session.entries.last() {
                    profile.age.get_or_insert(latest.user_input.age);
                    profile.gender.get_or_insert(latest.user_input.gender);
                    profile
                        .occupation
                        .get_or_insert_with(|| latest.user_input.occupation.clone());
                    profile
                        .lifestyle
                        .get_or_insert_with(|| latest.user_input.lifestyle.clone());
                }
            }
        }

        let account = resources
            .accounts
            .create_account(email, &request.password, profile)
            .await?;

        let merged_entries = match merge_session_into_account(
            &resources.sessions,
            &resources.accounts,
            &account.id,
            session_id.as_deref(),
        )
        .await
        {
            MergeOutcome::Merged { entries } => entries,
            MergeOutcome::NothingToMerge | MergeOutcome::AlreadyMerged => 0,
        };

        Ok((
            StatusCode::CREATED,
            Json(RegisterResponse {
                account,
                merged_entries,
            }),
        ))
    }

    /// Get a page of the account's stretching history
    async fn get_history(
        State(resources): State<Arc<ServerResources>>,
        Path(account_id): Path<String>,
        Query(query): Query<HistoryQuery>,
    ) -> Result<impl IntoResponse, AppError> {
        // 404 for unknown accounts rather than an empty page
        resources.accounts.get_account(&account_id).await?;

        let limit = query
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let offset = query.offset.unwrap_or(0).max(0);

        let entries = resources
            .accounts
            .get_history(&account_id, limit, offset)
            .await?;

        Ok(Json(HistoryResponse {
            entries,
            limit,
            offset,
        }))
    }
}
