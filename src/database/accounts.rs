// ABOUTME: Database operations for registered accounts and their stretching history
// ABOUTME: Handles account creation with bcrypt hashing and history append/query
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_timestamp;
use crate::errors::{AppError, AppResult};
use crate::models::{Account, Gender, StretchingEntry, UserInput};

/// Profile fields captured at account creation
#[derive(Debug, Clone, Default)]
pub struct AccountProfile {
    pub age: Option<u8>,
    pub gender: Option<Gender>,
    pub occupation: Option<String>,
    pub lifestyle: Option<String>,
}

/// Account database operations manager
pub struct AccountManager {
    pool: SqlitePool,
}

impl AccountManager {
    /// Create a new account manager
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new account with a bcrypt-hashed password
    ///
    /// Hashing runs on a blocking thread because bcrypt is CPU intensive.
    ///
    /// # Errors
    ///
    /// Returns `ResourceAlreadyExists` when the email is taken, or a
    /// database error on query failure.
    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
        profile: AccountProfile,
    ) -> AppResult<Account> {
        let password = password.to_owned();
        let password_hash =
            tokio::task::spawn_blocking(move || bcrypt::hash(&password, bcrypt::DEFAULT_COST))
                .await
                .map_err(|e| AppError::internal(format!("Password hashing task failed: {e}")))?
                .map_err(|e| AppError::internal(format!("Failed to hash password: {e}")))?;

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();

        let result = sqlx::query(
            r"
            INSERT INTO users (id, email, password_hash, age, gender, occupation, lifestyle, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(&id)
        .bind(email)
        .bind(&password_hash)
        .bind(profile.age.map(i64::from))
        .bind(profile.gender.map(|g| g.as_str().to_owned()))
        .bind(&profile.occupation)
        .bind(&profile.lifestyle)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                return Err(AppError::already_exists(format!(
                    "Account with email {email} already exists"
                )));
            }
            return Err(AppError::database(format!("Failed to create account: {e}")));
        }

        Ok(Account {
            id,
            email: email.to_owned(),
            age: profile.age,
            gender: profile.gender,
            occupation: profile.occupation,
            lifestyle: profile.lifestyle,
            created_at,
        })
    }

    /// Get an account by ID
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when the account does not exist, or a
    /// database error on query failure.
    pub async fn get_account(&self, account_id: &str) -> AppResult<Account> {
        let row = sqlx::query(
            r"
            SELECT id, email, age, gender, occupation, lifestyle, created_at
            FROM users
            WHERE id = $1
            ",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get account: {e}")))?
        .ok_or_else(|| AppError::not_found(format!("Account {account_id} not found")))?;

        let gender = row
            .get::<Option<String>, _>("gender")
            .as_deref()
            .map(Gender::parse)
            .transpose()?;

        Ok(Account {
            id: row.get("id"),
            email: row.get("email"),
            age: row
                .get::<Option<i64>, _>("age")
                .and_then(|a| u8::try_from(a).ok()),
            gender,
            occupation: row.get("occupation"),
            lifestyle: row.get("lifestyle"),
            created_at: parse_timestamp(row.get::<String, _>("created_at").as_str())?,
        })
    }

    /// Append session entries to an account's history
    ///
    /// Entries are tagged with `origin_session_id`, which makes repeated
    /// transfers of the same session detectable. Positions continue from
    /// the account's current maximum, preserving append order.
    ///
    /// The whole batch runs in one transaction: either every entry lands
    /// with the origin tag or none do, so an interrupted transfer is
    /// invisible to a later idempotency check.
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure; nothing is written in
    /// that case.
    pub async fn append_history(
        &self,
        account_id: &str,
        origin_session_id: Option<&str>,
        entries: &[StretchingEntry],
    ) -> AppResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin history append: {e}")))?;

        let mut appended = 0u64;

        for entry in entries {
            let input_json = serde_json::to_string(&entry.user_input)
                .map_err(|e| AppError::internal(format!("Failed to serialize user input: {e}")))?;

            sqlx::query(
                r"
                INSERT INTO account_history (id, user_id, origin_session_id, position, created_at, user_input, ai_response, feedback)
                VALUES (
                    $1, $2, $3,
                    (SELECT COALESCE(MAX(position) + 1, 0) FROM account_history WHERE user_id = $2),
                    $4, $5, $6, $7
                )
                ",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(account_id)
            .bind(origin_session_id)
            .bind(entry.created_at.to_rfc3339())
            .bind(&input_json)
            .bind(&entry.ai_response)
            .bind(&entry.feedback)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to append history entry: {e}")))?;

            appended += 1;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit history append: {e}")))?;

        Ok(appended)
    }

    /// Check whether the account already holds history from a session
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub async fn history_has_origin(
        &self,
        account_id: &str,
        origin_session_id: &str,
    ) -> AppResult<bool> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) as count
            FROM account_history
            WHERE user_id = $1 AND origin_session_id = $2
            ",
        )
        .bind(account_id)
        .bind(origin_session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to check history origin: {e}")))?;

        Ok(row.get::<i64, _>("count") > 0)
    }

    /// Get an account's history in append order with pagination
    ///
    /// # Errors
    ///
    /// Returns a database error on query failure.
    pub async fn get_history(
        &self,
        account_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<StretchingEntry>> {
        let rows = sqlx::query(
            r"
            SELECT id, origin_session_id, created_at, user_input, ai_response, feedback
            FROM account_history
            WHERE user_id = $1
            ORDER BY position ASC
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get account history: {e}")))?;

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
                    origin_session_id: r.get("origin_session_id"),
                })
            })
            .collect()
    }
}
