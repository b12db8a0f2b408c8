// ABOUTME: Core domain models for user input, stretching entries, sessions, and accounts
// ABOUTME: Boundary validation for user-supplied fields lives on the input types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

//! Domain models shared across storage, orchestration, and routes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Gender of the user, free-form values are accepted at the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    /// String form used in storage and API payloads
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }

    /// Parse the stored string form
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for unrecognized values.
    pub fn parse(raw: &str) -> AppResult<Self> {
        match raw {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            "other" => Ok(Self::Other),
            _ => Err(AppError::invalid_input(format!("Unknown gender: {raw}"))),
        }
    }
}

/// The questionnaire answers a guide request is generated from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInput {
    /// User age in years
    pub age: u8,
    /// Gender
    pub gender: Gender,
    /// Occupation, free text
    pub occupation: String,
    /// Lifestyle description, free text
    pub lifestyle: String,
    /// Selected body parts, comma-joined (e.g. "목, 어깨")
    pub selected_body_parts: String,
    /// Pain intensity on a 0-10 scale
    pub pain_level: u8,
    /// Detailed pain description, free text
    pub pain_description: String,
}

impl UserInput {
    /// Validate scalar field ranges and lengths at the HTTP boundary
    ///
    /// # Errors
    ///
    /// Returns `ValueOutOfRange` for numeric fields and `InvalidInput` for
    /// text fields, naming the first offending field.
    pub fn validate(&self) -> AppResult<()> {
        if self.age > 120 {
            return Err(AppError::out_of_range("age must be between 0 and 120"));
        }
        if self.occupation.is_empty() || self.occupation.chars().count() > 100 {
            return Err(AppError::invalid_input(
                "occupation must be between 1 and 100 characters",
            ));
        }
        if self.pain_level > 10 {
            return Err(AppError::out_of_range(
                "pain_level must be between 0 and 10",
            ));
        }
        let description_len = self.pain_description.chars().count();
        if !(10..=500).contains(&description_len) {
            return Err(AppError::invalid_input(
                "pain_description must be between 10 and 500 characters",
            ));
        }
        Ok(())
    }

    /// Body parts split on commas with whitespace trimmed, empties removed
    #[must_use]
    pub fn body_parts(&self) -> Vec<String> {
        self.selected_body_parts
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

/// One guide request and its results, stored inside a session or an account history
///
/// Created once per guide request; `ai_response` and `feedback` are point-updated
/// in place by id, entries are never deleted individually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StretchingEntry {
    /// Opaque entry id, generated at creation
    pub id: String,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    /// The originating questionnaire answers
    pub user_input: UserInput,
    /// Generated guide text, filled once generation completes
    pub ai_response: Option<String>,
    /// Optional user feedback on the guide
    pub feedback: Option<String>,
    /// Session the entry was transferred from, set during merge
    pub origin_session_id: Option<String>,
}

/// Anonymous, TTL-expiring record of a visitor's guide requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralSession {
    /// Caller-supplied unique session id
    pub session_id: String,
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// When the session expires unless converted to an account
    pub expires_at: DateTime<Utc>,
    /// Ordered guide entries
    pub entries: Vec<StretchingEntry>,
}

/// Durable account record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Account id
    pub id: String,
    /// Email, unique across accounts
    pub email: String,
    /// Profile: age
    pub age: Option<u8>,
    /// Profile: gender
    pub gender: Option<Gender>,
    /// Profile: occupation
    pub occupation: Option<String>,
    /// Profile: lifestyle description
    pub lifestyle: Option<String>,
    /// When the account was created
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> UserInput {
        UserInput {
            age: 28,
            gender: Gender::Female,
            occupation: "사무직 회사원".into(),
            lifestyle: "주 5일 근무, 하루 8시간 앉아서 일함".into(),
            selected_body_parts: "목, 어깨".into(),
            pain_level: 7,
            pain_description: "장시간 컴퓨터 작업으로 인한 목과 어깨 통증".into(),
        }
    }

    #[test]
    fn test_valid_input_passes() {
        assert!(sample_input().validate().is_ok());
    }

    #[test]
    fn test_pain_level_out_of_range() {
        let mut input = sample_input();
        input.pain_level = 11;
        let err = input.validate().unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::ValueOutOfRange);
    }

    #[test]
    fn test_excessive_age_out_of_range() {
        let mut input = sample_input();
        input.age = 121;
        let err = input.validate().unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::ValueOutOfRange);
    }

    #[test]
    fn test_short_pain_description_rejected() {
        let mut input = sample_input();
        input.pain_description = "짧음".into();
        let err = input.validate().unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::InvalidInput);
    }

    #[test]
    fn test_body_parts_split_and_trim() {
        let input = sample_input();
        assert_eq!(input.body_parts(), vec!["목", "어깨"]);
    }
}
