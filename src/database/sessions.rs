// ABOUTME: Database operations for ephemeral stretching sessions and their entries
// ABOUTME: Handles session lifecycle, entry append/update, and TTL-based expiry sweeps
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_timestamp;
use crate::errors::{AppError, AppResult};
use crate::models::{EphemeralSession, StretchingEntry, UserInput};

/// Entry field that can be updated after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryField {
    /// The generated guide text
    AiResponse,
    /// User feedback on the guide
    Feedback,
}

impl EntryField {
    const fn column(self) -> &'static str {
        match self {
            Self::AiResponse => "ai_response",
            Self::Feedback => "feedback",
        }
    }
}

/// Session database operations manager
pub struct SessionManager {
    pool: SqlitePool,
}

impl SessionManager {
    /// Create a new session manager
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new ephemeral session with the given time-to-live
    ///
    /// # Errors
    ///
    /// Returns `ResourceAlreadyExists` when the id is already taken, or a
    /// database error on query failure.
    pub async fn create_session(
        &self,
        session_id: &str,
        ttl_hours: i64,
    ) -> AppResult<EphemeralSession> {
        let created_at = Utc::now();
        let expires_at = created_at + Duration::hours(ttl_hours);

        let result = sqlx::query(
            r"
            INSERT INTO sessions (session_id, created_at, expires_at)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(session_id)
        .bind(created_at.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                return Err(AppError::already_exists(format!(
                    "Session {session_id} already exists"
                )));
            }
            return Err(AppError::database(format!("Failed to create session: {e}")));
        }

        Ok(EphemeralSession {
            session_id: session_id.to_owned(),
            created_at,
            expires_at,
            entries: Vec::new(),
        })
    }

    /// Get a session with its entries in append order
    ///
    /// An expired session is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when the session does not exist or has
    /// expired, or a database error on query failure.
    pub async fn get_session(&self, session_id: &str) -> AppResult<EphemeralSession> {
        let row = sqlx::query(
            r"
            SELECT session_id, created_at, expires_at
            FROM sessions
            WHERE session_id = $1
            ",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get session: {e}")))?
        .ok_or_else(|| AppError::not_found(format!("Session {session_id} not found")))?;

        let created_at = parse_timestamp(row.get::<String, _>("created_at").as_str())?;
        let expires_at = parse_timestamp(row.get::<String, _>("expires_at").as_str())?;

        if expires_at <= Utc::now() {
            return Err(AppError::not_found(format!(
                "Session {session_id} has expired"
            )));
        }

        let entries = self.load_entries(session_id).await?;

        Ok(EphemeralSession {
            session_id: session_id.to_owned(),
            created_at,
            expires_at,
            entries,
        })
    }

    async fn load_entries(&self, session_id: &str) -> AppResult<Vec<StretchingEntry>> {
        let rows = sqlx::query(
            r"
            SELECT id, created_at, user_input, ai_response, feedback
            FROM session_entries
            WHERE session_id = $1
            ORDER BY position ASC
            ",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to load session entries: {e}")))?;

        rows.into_iter()
            .map(|r| {
                let input_json: String = r.get("user_input");
                let user_input: UserInput = serde_json::from_str(&input_json).map_err(|e| {
                    AppError::database(format!("Stored user input is malformed: {e}"))
                })?;
                Ok(StretchingEntry {
                    id: r.get("id"),
                    created_at: parse_timestamp(r.get::<String, _>("created_at").as_str())?,
                    user_input,
                    ai_response: r.get("ai_response"),
                    feedback: r.get("feedback"),
                    origin_session_id: None,
                })
            })
            .collect()
    }

    /// Append a new entry to a session, assigning the next position
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when the session does not exist or has
    /// expired, or a database error on query failure.
    pub async fn append_entry(
        &self,
        session_id: &str,
        user_input: &UserInput,
    ) -> AppResult<StretchingEntry> {
        // Validates existence and expiry before writing
        self.get_session(session_id).await?;

        let entry_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let input_json = serde_json::to_string(user_input)
            .map_err(|e| AppError::internal(format!("Failed to serialize user input: {e}")))?;

        sqlx::query(
            r"
            INSERT INTO session_entries (id, session_id, position, created_at, user_input)
            VALUES (
                $1, $2,
                (SELECT COALESCE(MAX(position) + 1, 0) FROM session_entries WHERE session_id = $2),
                $3, $4
            )
            ",
        )
        .bind(&entry_id)
        .bind(session_id)
        .bind(created_at.to_rfc3339())
        .bind(&input_json)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to append session entry: {e}")))?;

        Ok(StretchingEntry {
            id: entry_id,
            created_at,
            user_input: user_input.clone(),
            ai_response: None,
            feedback: None,
            origin_session_id: None,
        })
    }

    /// Update a single field of an existing entry
    ///
    /// A non-matching (session, entry) pair is a no-op reported as
    /// `Ok(false)`, not an error.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub async fn update_entry_field(
        &self,
        session_id: &str,
        entry_id: &str,
        field: EntryField,
        value: &str,
    ) -> AppResult<bool> {
        let query = format!(
            "UPDATE session_entries SET {} = $1 WHERE id = $2 AND session_id = $3",
            field.column()
        );

        let result = sqlx::query(&query)
            .bind(value)
            .bind(entry_id)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to update session entry: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a session and its entries
    ///
    /// Deleting an absent session is not an error.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub async fn delete_session(&self, session_id: &str) -> AppResult<bool> {
        // ON DELETE CASCADE is not always enforced by SQLite connections,
        // so entries are removed explicitly.
        sqlx::query("DELETE FROM session_entries WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete session entries: {e}")))?;

        let result = sqlx::query("DELETE FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to delete session: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete all expired sessions, returning how many were removed
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub async fn sweep_expired(&self) -> AppResult<u64> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r"
            DELETE FROM session_entries
            WHERE session_id IN (SELECT session_id FROM sessions WHERE expires_at <= $1)
            ",
        )
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to sweep expired entries: {e}")))?;

        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(&now)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to sweep expired sessions: {e}")))?;

        Ok(result.rows_affected())
    }
}
