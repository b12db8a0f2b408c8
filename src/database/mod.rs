// ABOUTME: Database management for session and account storage
// ABOUTME: Owns the SQLite pool, schema migrations, and row conversion helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

//! # Database Management
//!
//! SQLite-backed storage for ephemeral sessions and registered accounts.
//! [`SessionManager`] and [`AccountManager`] wrap the shared pool with
//! domain-specific operations.

pub mod accounts;
pub mod sessions;

pub use accounts::AccountManager;
pub use sessions::SessionManager;

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};

use crate::errors::{AppError, AppResult};

/// Database manager for session and account storage
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Create a new database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or migrations cannot run.
    pub async fn new(database_url: &str) -> AppResult<Self> {
        // Ensure SQLite creates the database file if it doesn't exist
        let connection_options = if database_url.starts_with("sqlite:") {
            format!("{database_url}?mode=rwc")
        } else {
            database_url.to_string()
        };

        let pool = SqlitePool::connect(&connection_options)
            .await
            .map_err(|e| AppError::database(format!("Failed to connect to database: {e}")))?;

        let db = Self { pool };
        db.migrate().await?;

        Ok(db)
    }

    /// Get a reference to the database pool
    #[must_use]
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Create a session manager over this database
    #[must_use]
    pub fn sessions(&self) -> SessionManager {
        SessionManager::new(self.pool.clone())
    }

    /// Create an account manager over this database
    #[must_use]
    pub fn accounts(&self) -> AccountManager {
        AccountManager::new(self.pool.clone())
    }

    /// Run database migrations
    ///
    /// # Errors
    ///
    /// Returns an error if a migration statement fails.
    pub async fn migrate(&self) -> AppResult<()> {
        self.migrate_sessions().await?;
        self.migrate_accounts().await?;
        Ok(())
    }

    async fn migrate_sessions(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create sessions table: {e}")))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS session_entries (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(session_id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                user_input TEXT NOT NULL,
                ai_response TEXT,
                feedback TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create session_entries table: {e}")))?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_session_entries_session
            ON session_entries(session_id, position)
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create session entry index: {e}")))?;

        Ok(())
    }

    async fn migrate_accounts(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                age INTEGER,
                gender TEXT,
                occupation TEXT,
                lifestyle TEXT,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create users table: {e}")))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS account_history (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                origin_session_id TEXT,
                position INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                user_input TEXT NOT NULL,
                ai_response TEXT,
                feedback TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create account_history table: {e}")))?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_account_history_user
            ON account_history(user_id, position)
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create account history index: {e}")))?;

        Ok(())
    }
}

/// Parse an RFC 3339 timestamp stored as TEXT
pub(crate) fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::database(format!("Invalid stored timestamp {raw}: {e}")))
}
