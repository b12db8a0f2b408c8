// ABOUTME: Guide generation orchestration: admission gate, retrieval, backend call, persistence
// ABOUTME: Serves batch and streaming generation from one retrieval + prompt pipeline
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

//! # Guide Orchestration
//!
//! The orchestrator turns a validated questionnaire into a persisted
//! stretching guide:
//!
//! 1. Append a new entry to the session (crash-safe, before any backend work).
//! 2. Acquire an admission permit, bounded by a wait timeout. Timing out is a
//!    retryable overload error, never a backend failure.
//! 3. Retrieve the closest corpus exercises for the pain description.
//! 4. Call the generation backend, buffered or streaming.
//! 5. Persist the guide text into the entry; mirror it into the account
//!    history when the request carries an account id.
//!
//! Backend failure and empty output degrade to a deterministic fallback
//! guide. Every request that clears the gate ends in a usable guide.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::GenerationConfig;
use crate::corpus::{CorpusIndex, SearchHit};
use crate::database::sessions::EntryField;
use crate::database::{AccountManager, SessionManager};
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::llm::prompts::{build_guide_prompt, fallback_guide, get_guide_system_prompt};
use crate::llm::{
    ChatMessage, ChatRequest, ChatStream, CompletionOutcome, GenerationProvider, StreamChunk,
};
use crate::models::{StretchingEntry, UserInput};

/// Number of corpus exercises retrieved per request
const RETRIEVAL_TOP_K: usize = 3;

/// Sampling temperature for guide generation
const GUIDE_TEMPERATURE: f32 = 0.3;

/// Token budget for a generated guide
const GUIDE_MAX_TOKENS: u32 = 1500;

/// Orchestrates retrieval, generation, and persistence for guide requests
pub struct GuideOrchestrator {
    corpus: Arc<CorpusIndex>,
    provider: Arc<dyn GenerationProvider>,
    sessions: Arc<SessionManager>,
    accounts: Arc<AccountManager>,
    gate: Arc<Semaphore>,
    gate_wait: Duration,
    model: String,
}

impl GuideOrchestrator {
    /// Create an orchestrator with a gate sized from configuration
    #[must_use]
    pub fn new(
        config: &GenerationConfig,
        corpus: Arc<CorpusIndex>,
        provider: Arc<dyn GenerationProvider>,
        sessions: Arc<SessionManager>,
        accounts: Arc<AccountManager>,
    ) -> Self {
        let model = if config.model.is_empty() {
            provider.default_model().to_string()
        } else {
            config.model.clone()
        };
        debug!(
            provider = provider.name(),
            model = %model,
            gate_capacity = config.gate_capacity,
            "Guide orchestrator initialized"
        );
        Self {
            corpus,
            provider,
            sessions,
            accounts,
            gate: Arc::new(Semaphore::new(config.gate_capacity)),
            gate_wait: config.gate_wait,
            model,
        }
    }

    /// Acquire an admission permit, bounded by the configured wait timeout
    ///
    /// The permit is an RAII guard held across the whole generation, including
    /// stream consumption, so release is guaranteed on every exit path.
    async fn acquire_permit(&self) -> AppResult<OwnedSemaphorePermit> {
        match tokio::time::timeout(self.gate_wait, Arc::clone(&self.gate).acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(AppError::internal("Admission gate closed")),
            Err(_) => Err(AppError::overloaded(
                "Too many concurrent guide requests, try again shortly",
            )),
        }
    }

    /// Retrieve corpus exercises for the request
    ///
    /// Retrieval trouble degrades to an empty result so generation can still
    /// proceed on the questionnaire alone.
    async fn retrieve(&self, input: &UserInput) -> Vec<SearchHit> {
        let body_parts = input.body_parts();
        match self
            .corpus
            .search(
                &input.pain_description,
                &body_parts,
                Some(&input.occupation),
                RETRIEVAL_TOP_K,
            )
            .await
        {
            Ok(hits) => {
                debug!(hits = hits.len(), "Corpus retrieval complete");
                hits
            }
            Err(e) => {
                warn!("Corpus retrieval unavailable, generating without context: {e}");
                Vec::new()
            }
        }
    }

    fn build_request(&self, input: &UserInput, hits: &[SearchHit]) -> ChatRequest {
        let messages = vec![
            ChatMessage::system(get_guide_system_prompt()),
            ChatMessage::user(build_guide_prompt(input, hits)),
        ];
        ChatRequest::new(messages)
            .with_model(self.model.clone())
            .with_temperature(GUIDE_TEMPERATURE)
            .with_max_tokens(GUIDE_MAX_TOKENS)
    }

    /// Whether a backend error degrades to the fallback guide
    ///
    /// Overload is surfaced to the caller as retryable. Everything else the
    /// backend can produce is absorbed into the deterministic fallback.
    const fn falls_back(code: ErrorCode) -> bool {
        matches!(
            code,
            ErrorCode::ExternalServiceError
                | ErrorCode::ExternalResponseMalformed
                | ErrorCode::ConfigError
        )
    }

    async fn persist_guide(
        &self,
        session_id: &str,
        entry: &StretchingEntry,
        account_id: Option<&str>,
        text: &str,
    ) -> AppResult<()> {
        let updated = self
            .sessions
            .update_entry_field(session_id, &entry.id, EntryField::AiResponse, text)
            .await?;
        if !updated {
            warn!(
                session_id,
                entry_id = %entry.id,
                "Guide not persisted, session expired during generation"
            );
        }

        if let Some(account_id) = account_id {
            let mut mirrored = entry.clone();
            mirrored.ai_response = Some(text.to_owned());
            if let Err(e) = self
                .accounts
                .append_history(account_id, None, std::slice::from_ref(&mirrored))
                .await
            {
                warn!("Failed to mirror guide into account history: {e}");
            }
        }

        Ok(())
    }

    /// Generate a guide and persist it into a new session entry
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` or `ValueOutOfRange` for questionnaire
    /// violations, `NotFound` for
    /// missing or expired sessions, retryable `Overloaded` when the gate
    /// times out or the backend rate-limits, and database errors from
    /// persistence. Backend failure does not error; it falls back.
    pub async fn generate(
        &self,
        session_id: &str,
        input: UserInput,
        account_id: Option<&str>,
    ) -> AppResult<StretchingEntry> {
        input.validate()?;
        let mut entry = self.sessions.append_entry(session_id, &input).await?;

        let permit = self.acquire_permit().await?;
        let hits = self.retrieve(&input).await;
        let request = self.build_request(&input, &hits);

        let text = match self.provider.complete(&request).await {
            Ok(CompletionOutcome::Success(response)) => response.content,
            Ok(CompletionOutcome::Empty) => {
                warn!("Backend returned empty guide, using fallback");
                fallback_guide(&input)
            }
            Err(e) if Self::falls_back(e.code) => {
                warn!("Backend failed, using fallback guide: {e}");
                fallback_guide(&input)
            }
            Err(e) => return Err(e),
        };
        drop(permit);

        self.persist_guide(session_id, &entry, account_id, &text)
            .await?;
        info!(
            session_id,
            entry_id = %entry.id,
            chars = text.len(),
            "Guide generated"
        );

        entry.ai_response = Some(text);
        Ok(entry)
    }

    /// Generate a guide as a stream of text chunks
    ///
    /// Returns the created entry (without guide text yet) and a chunk stream.
    /// Non-final chunks carry text increments; exactly one final chunk with
    /// empty text closes the stream. After the final chunk the accumulated
    /// text has been persisted into the entry.
    ///
    /// # Errors
    ///
    /// Same as [`Self::generate`] for everything preceding the backend call.
    pub async fn generate_stream(
        &self,
        session_id: &str,
        input: UserInput,
        account_id: Option<&str>,
    ) -> AppResult<(StretchingEntry, ChatStream)> {
        input.validate()?;
        let entry = self.sessions.append_entry(session_id, &input).await?;

        let permit = self.acquire_permit().await?;
        let hits = self.retrieve(&input).await;
        let request = self.build_request(&input, &hits);

        let upstream = match self.provider.complete_stream(&request).await {
            Ok(stream) => Some(stream),
            Err(e) if Self::falls_back(e.code) => {
                warn!("Backend stream failed, streaming fallback guide: {e}");
                None
            }
            Err(e) => return Err(e),
        };

        let sessions = Arc::clone(&self.sessions);
        let accounts = Arc::clone(&self.accounts);
        let session_id = session_id.to_owned();
        let account_id = account_id.map(str::to_owned);
        let stream_entry = entry.clone();

        let stream: ChatStream = Box::pin(stream! {
            // Permit lives inside the stream so it is released when the
            // stream finishes or is dropped mid-flight.
            let _permit = permit;
            let mut full_text = String::new();

            match upstream {
                Some(mut upstream) => {
                    while let Some(item) = upstream.next().await {
                        match item {
                            Ok(chunk) => {
                                if !chunk.delta.is_empty() {
                                    full_text.push_str(&chunk.delta);
                                    yield Ok(StreamChunk {
                                        delta: chunk.delta,
                                        is_final: false,
                                        finish_reason: None,
                                    });
                                }
                                if chunk.is_final {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Backend stream interrupted: {e}");
                                break;
                            }
                        }
                    }
                    if full_text.is_empty() {
                        // Nothing arrived before the stream ended
                        full_text = fallback_guide(&stream_entry.user_input);
                        yield Ok(StreamChunk {
                            delta: full_text.clone(),
                            is_final: false,
                            finish_reason: None,
                        });
                    }
                }
                None => {
                    // Stream the fallback as first line, then the remainder
                    full_text = fallback_guide(&stream_entry.user_input);
                    let first_line_len = full_text.find('\n').map_or(full_text.len(), |p| p + 1);
                    let (head, tail) = full_text.split_at(first_line_len);
                    yield Ok(StreamChunk {
                        delta: head.to_owned(),
                        is_final: false,
                        finish_reason: None,
                    });
                    if !tail.is_empty() {
                        yield Ok(StreamChunk {
                            delta: tail.to_owned(),
                            is_final: false,
                            finish_reason: None,
                        });
                    }
                }
            }

            match sessions
                .update_entry_field(&session_id, &stream_entry.id, EntryField::AiResponse, &full_text)
                .await
            {
                Ok(updated) => {
                    if updated {
                        info!(
                            session_id = %session_id,
                            entry_id = %stream_entry.id,
                            chars = full_text.len(),
                            "Streamed guide persisted"
                        );
                    } else {
                        warn!(
                            session_id = %session_id,
                            entry_id = %stream_entry.id,
                            "Streamed guide not persisted, session expired mid-stream"
                        );
                    }
                    if let Some(account_id) = account_id {
                        let mut mirrored = stream_entry.clone();
                        mirrored.ai_response = Some(full_text.clone());
                        if let Err(e) = accounts
                            .append_history(&account_id, None, std::slice::from_ref(&mirrored))
                            .await
                        {
                            warn!("Failed to mirror guide into account history: {e}");
                        }
                    }
                }
                Err(e) => warn!("Failed to persist streamed guide: {e}"),
            }

            yield Ok(StreamChunk {
                delta: String::new(),
                is_final: true,
                finish_reason: Some("stop".to_owned()),
            });
        });

        Ok((entry, stream))
    }
}
