// ABOUTME: HTTP routes for ephemeral sessions and guide generation
// ABOUTME: Session lifecycle, batch and streaming generation, and entry feedback
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        AppendHeaders, IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use super::session_cookie_value;
use crate::database::sessions::EntryField;
use crate::errors::AppError;
use crate::models::{StretchingEntry, UserInput};
use crate::server::ServerResources;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response to session creation
#[derive(Debug, Serialize)]
pub struct SessionCreatedResponse {
    /// The new session id, also set as a cookie
    pub session_id: String,
    /// When the session expires
    pub expires_at: DateTime<Utc>,
}

/// Body for guide generation requests
#[derive(Debug, Deserialize)]
pub struct GuideRequest {
    /// The questionnaire answers
    #[serde(flatten)]
    pub user_input: UserInput,
    /// Account to mirror the guide into, when the caller is registered
    #[serde(default)]
    pub account_id: Option<String>,
}

/// Response to batch guide generation
#[derive(Debug, Serialize)]
pub struct GuideResponse {
    /// Id of the created entry
    pub entry_id: String,
    /// The generated guide text
    pub text: String,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
}

/// Body for feedback submission
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    /// Free-form feedback on the guide
    pub feedback: String,
}

/// Response to feedback submission
#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    /// Whether a matching entry was updated
    pub updated: bool,
}

/// One SSE payload in the guide stream
#[derive(Debug, Serialize)]
struct GuideStreamEvent<'a> {
    content: &'a str,
    done: bool,
}

// ============================================================================
// Routes
// ============================================================================

/// Session and guide generation routes
pub struct SessionRoutes;

impl SessionRoutes {
    /// Create all session routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/v1/sessions", post(Self::create_session))
            .route("/api/v1/sessions/:session_id", get(Self::get_session))
            .route(
                "/api/v1/sessions/:session_id/stretching",
                post(Self::generate_guide),
            )
            .route(
                "/api/v1/sessions/:session_id/stretching/stream",
                post(Self::generate_guide_stream),
            )
            .route(
                "/api/v1/sessions/:session_id/stretching/:entry_id/feedback",
                post(Self::submit_feedback),
            )
            .with_state(resources)
    }

    /// Create a new ephemeral session and set the session cookie
    async fn create_session(
        State(resources): State<Arc<ServerResources>>,
    ) -> Result<impl IntoResponse, AppError> {
        let session_id = Uuid::new_v4().to_string();
        let ttl_hours = resources.config.session.ttl_hours;
        let session = resources
            .sessions
            .create_session(&session_id, ttl_hours)
            .await?;

        let cookie = session_cookie_value(&session.session_id, ttl_hours * 3600);
        Ok((
            StatusCode::CREATED,
            AppendHeaders([(header::SET_COOKIE, cookie)]),
            Json(SessionCreatedResponse {
                session_id: session.session_id,
                expires_at: session.expires_at,
            }),
        ))
    }

    /// Get a session with its entries
    async fn get_session(
        State(resources): State<Arc<ServerResources>>,
        Path(session_id): Path<String>,
    ) -> Result<impl IntoResponse, AppError> {
        let session = resources.sessions.get_session(&session_id).await?;
        Ok(Json(session))
    }

    /// Generate a guide and return the full text
    async fn generate_guide(
        State(resources): State<Arc<ServerResources>>,
        Path(session_id): Path<String>,
        Json(request): Json<GuideRequest>,
    ) -> Result<impl IntoResponse, AppError> {
        let entry: StretchingEntry = resources
            .orchestrator
            .generate(
                &session_id,
                request.user_input,
                request.account_id.as_deref(),
            )
            .await?;

        Ok(Json(GuideResponse {
            text: entry.ai_response.unwrap_or_default(),
            entry_id: entry.id,
            created_at: entry.created_at,
        }))
    }

    /// Generate a guide as a `text/event-stream` response
    ///
    /// Each event is `data: {"content": <chunk>, "done": <bool>}`; exactly
    /// one `done=true` event with empty content terminates the stream. The
    /// created entry's id is exposed in the `x-entry-id` header.
    async fn generate_guide_stream(
        State(resources): State<Arc<ServerResources>>,
        Path(session_id): Path<String>,
        Json(request): Json<GuideRequest>,
    ) -> Result<
        (
            AppendHeaders<[(&'static str, String); 1]>,
            Sse<impl Stream<Item = Result<Event, Infallible>>>,
        ),
        AppError,
    > {
        let (entry, mut chunks) = resources
            .orchestrator
            .generate_stream(
                &session_id,
                request.user_input,
                request.account_id.as_deref(),
            )
            .await?;

        let stream = async_stream::stream! {
            while let Some(item) = chunks.next().await {
                match item {
                    Ok(chunk) => {
                        let event = GuideStreamEvent {
                            content: &chunk.delta,
                            done: chunk.is_final,
                        };
                        let payload = serde_json::to_string(&event)
                            .unwrap_or_else(|_| r#"{"content":"","done":true}"#.to_owned());
                        yield Ok(Event::default().data(payload));
                        if chunk.is_final {
                            return;
                        }
                    }
                    Err(e) => {
                        // The orchestrator absorbs backend failures; anything
                        // surfacing here still terminates the stream cleanly.
                        tracing::warn!("Guide stream error: {e}");
                        let payload = r#"{"content":"","done":true}"#.to_owned();
                        yield Ok(Event::default().data(payload));
                        return;
                    }
                }
            }
        };

        Ok((
            AppendHeaders([("x-entry-id", entry.id)]),
            Sse::new(stream).keep_alive(KeepAlive::default()),
        ))
    }

    /// Attach feedback to an existing entry
    async fn submit_feedback(
        State(resources): State<Arc<ServerResources>>,
        Path((session_id, entry_id)): Path<(String, String)>,
        Json(request): Json<FeedbackRequest>,
    ) -> Result<impl IntoResponse, AppError> {
        if request.feedback.trim().is_empty() {
            return Err(AppError::invalid_input("feedback must not be empty"));
        }

        let updated = resources
            .sessions
            .update_entry_field(&session_id, &entry_id, EntryField::Feedback, &request.feedback)
            .await?;

        Ok(Json(FeedbackResponse { updated }))
    }
}
