// ABOUTME: Integration tests for guide generation orchestration
// ABOUTME: Covers fallback behavior, admission gating, streaming, and persistence
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use stretch_coach::config::{CorpusConfig, GenerationConfig};
use stretch_coach::corpus::CorpusIndex;
use stretch_coach::database::Database;
use stretch_coach::errors::{AppError, ErrorCode};
use stretch_coach::llm::{
    ChatRequest, ChatResponse, ChatStream, CompletionOutcome, GenerationProvider, StreamChunk,
};
use stretch_coach::models::{Gender, UserInput};
use stretch_coach::services::GuideOrchestrator;
use tempfile::TempDir;

/// What the mock backend does when called
#[derive(Clone)]
enum Mode {
    Success(String),
    Empty,
    Unavailable,
    RateLimited,
    Stream(Vec<String>),
    Slow(Duration),
}

struct MockProvider {
    mode: Mode,
}

impl MockProvider {
    const fn new(mode: Mode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, _request: &ChatRequest) -> Result<CompletionOutcome, AppError> {
        match &self.mode {
            Mode::Success(text) => Ok(CompletionOutcome::Success(ChatResponse {
                content: text.clone(),
                model: "mock-model".into(),
                usage: None,
                finish_reason: Some("stop".into()),
            })),
            Mode::Empty => Ok(CompletionOutcome::Empty),
            Mode::Unavailable => Err(AppError::external_service("mock", "backend down")),
            Mode::RateLimited => Err(AppError::overloaded("rate limited")),
            Mode::Stream(_) => Err(AppError::internal("mock is stream-only")),
            Mode::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(CompletionOutcome::Success(ChatResponse {
                    content: "slow guide".into(),
                    model: "mock-model".into(),
                    usage: None,
                    finish_reason: Some("stop".into()),
                }))
            }
        }
    }

    async fn complete_stream(&self, _request: &ChatRequest) -> Result<ChatStream, AppError> {
        match &self.mode {
            Mode::Stream(chunks) => {
                let mut items: Vec<Result<StreamChunk, AppError>> = chunks
                    .iter()
                    .map(|c| {
                        Ok(StreamChunk {
                            delta: c.clone(),
                            is_final: false,
                            finish_reason: None,
                        })
                    })
                    .collect();
                items.push(Ok(StreamChunk {
                    delta: String::new(),
                    is_final: true,
                    finish_reason: Some("stop".into()),
                }));
                Ok(Box::pin(futures_util::stream::iter(items)))
            }
            Mode::Unavailable => Err(AppError::external_service("mock", "backend down")),
            _ => Err(AppError::internal("mock streaming not configured")),
        }
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        Ok(true)
    }
}

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

fn generation_config(gate_capacity: usize, gate_wait: Duration) -> GenerationConfig {
    GenerationConfig {
        base_url: "http://localhost:1".into(),
        api_key: None,
        model: "mock-model".into(),
        gate_capacity,
        gate_wait,
        pool_capacity: gate_capacity,
        request_timeout: Duration::from_secs(5),
    }
}

/// Orchestrator over a fresh database, an unloadable corpus, and the mock
///
/// Retrieval degrades to no results when the corpus cannot load, which
/// keeps these tests focused on generation behavior.
async fn build_orchestrator(
    mode: Mode,
    config: GenerationConfig,
) -> Result<(GuideOrchestrator, Database, TempDir)> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite:{}/test.db", dir.path().display());
    let db = Database::new(&url).await?;

    let corpus = Arc::new(CorpusIndex::new(CorpusConfig {
        data_path: PathBuf::from("/nonexistent/exercises.json"),
        embeddings_path: PathBuf::from("/nonexistent/embeddings.json"),
        model_dir: PathBuf::from("/nonexistent/model"),
        model_id: "unused".into(),
    }));

    let orchestrator = GuideOrchestrator::new(
        &config,
        corpus,
        Arc::new(MockProvider::new(mode)),
        Arc::new(db.sessions()),
        Arc::new(db.accounts()),
    );
    Ok((orchestrator, db, dir))
}

#[tokio::test]
async fn test_generate_persists_guide_text() -> Result<()> {
    let config = generation_config(4, Duration::from_secs(1));
    let (orchestrator, db, _dir) =
        build_orchestrator(Mode::Success("맞춤 스트레칭 가이드".into()), config).await?;
    db.sessions().create_session("s1", 24).await?;

    let entry = orchestrator.generate("s1", sample_input(), None).await?;
    assert_eq!(entry.ai_response.as_deref(), Some("맞춤 스트레칭 가이드"));

    let session = db.sessions().get_session("s1").await?;
    assert_eq!(session.entries.len(), 1);
    assert_eq!(
        session.entries[0].ai_response.as_deref(),
        Some("맞춤 스트레칭 가이드")
    );
    Ok(())
}

#[tokio::test]
async fn test_empty_completion_uses_fallback_guide() -> Result<()> {
    let config = generation_config(4, Duration::from_secs(1));
    let (orchestrator, _db, _dir) = build_orchestrator(Mode::Empty, config).await?;
    _db.sessions().create_session("s1", 24).await?;

    let entry = orchestrator.generate("s1", sample_input(), None).await?;
    let text = entry.ai_response.unwrap();
    // The fallback is built from the questionnaire, not the backend
    assert!(text.contains("사무직 회사원"));
    assert!(text.contains("목, 어깨"));
    assert!(text.contains("7/10"));
    Ok(())
}

#[tokio::test]
async fn test_backend_outage_uses_fallback_guide() -> Result<()> {
    let config = generation_config(4, Duration::from_secs(1));
    let (orchestrator, db, _dir) = build_orchestrator(Mode::Unavailable, config).await?;
    db.sessions().create_session("s1", 24).await?;

    let entry = orchestrator.generate("s1", sample_input(), None).await?;
    assert!(entry.ai_response.unwrap().contains("사무직 회사원"));
    Ok(())
}

#[tokio::test]
async fn test_backend_rate_limit_propagates_as_overloaded() -> Result<()> {
    let config = generation_config(4, Duration::from_secs(1));
    let (orchestrator, _db, _dir) = build_orchestrator(Mode::RateLimited, config).await?;
    _db.sessions().create_session("s1", 24).await?;

    let err = orchestrator
        .generate("s1", sample_input(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Overloaded);
    Ok(())
}

#[tokio::test]
async fn test_invalid_input_rejected_before_gate() -> Result<()> {
    let config = generation_config(4, Duration::from_secs(1));
    let (orchestrator, db, _dir) =
        build_orchestrator(Mode::Success("guide".into()), config).await?;
    db.sessions().create_session("s1", 24).await?;

    let mut input = sample_input();
    input.pain_level = 11;
    let err = orchestrator.generate("s1", input, None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ValueOutOfRange);

    // No entry was appended for the rejected request
    assert!(db.sessions().get_session("s1").await?.entries.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_gate_timeout_reports_overloaded() -> Result<()> {
    let config = generation_config(1, Duration::from_millis(50));
    let (orchestrator, db, _dir) =
        build_orchestrator(Mode::Slow(Duration::from_millis(500)), config).await?;
    db.sessions().create_session("s1", 24).await?;
    db.sessions().create_session("s2", 24).await?;

    let orchestrator = Arc::new(orchestrator);
    let slow = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.generate("s1", sample_input(), None).await })
    };
    // Give the first request time to take the only permit
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = orchestrator
        .generate("s2", sample_input(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Overloaded);

    let first = slow.await??;
    assert_eq!(first.ai_response.as_deref(), Some("slow guide"));
    Ok(())
}

#[tokio::test]
async fn test_session_deleted_mid_generation_still_returns_guide() -> Result<()> {
    let config = generation_config(4, Duration::from_secs(1));
    let (orchestrator, db, _dir) =
        build_orchestrator(Mode::Slow(Duration::from_millis(500)), config).await?;
    db.sessions().create_session("s1", 24).await?;

    let orchestrator = Arc::new(orchestrator);
    let request = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.generate("s1", sample_input(), None).await })
    };
    // Let the entry land and the backend call start, then pull the session away
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(db.sessions().delete_session("s1").await?);

    // The caller still gets the guide; only the session copy is gone
    let entry = request.await??;
    assert_eq!(entry.ai_response.as_deref(), Some("slow guide"));
    let err = db.sessions().get_session("s1").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);
    Ok(())
}

#[tokio::test]
async fn test_stream_concatenation_is_persisted() -> Result<()> {
    let config = generation_config(4, Duration::from_secs(1));
    let chunks = vec!["목과 어깨를 ".to_owned(), "천천히 풀어주세요".to_owned()];
    let (orchestrator, db, _dir) = build_orchestrator(Mode::Stream(chunks), config).await?;
    db.sessions().create_session("s1", 24).await?;

    let (entry, mut stream) = orchestrator
        .generate_stream("s1", sample_input(), None)
        .await?;

    let mut collected = String::new();
    let mut saw_final = false;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_final {
            assert!(chunk.delta.is_empty());
            saw_final = true;
        } else {
            collected.push_str(&chunk.delta);
        }
    }
    assert!(saw_final);
    assert_eq!(collected, "목과 어깨를 천천히 풀어주세요");

    // The accumulated text was persisted before the final chunk
    let session = db.sessions().get_session("s1").await?;
    assert_eq!(session.entries[0].id, entry.id);
    assert_eq!(session.entries[0].ai_response.as_deref(), Some(collected.as_str()));
    Ok(())
}

#[tokio::test]
async fn test_stream_falls_back_when_backend_unavailable() -> Result<()> {
    let config = generation_config(4, Duration::from_secs(1));
    let (orchestrator, db, _dir) = build_orchestrator(Mode::Unavailable, config).await?;
    db.sessions().create_session("s1", 24).await?;

    let (_entry, mut stream) = orchestrator
        .generate_stream("s1", sample_input(), None)
        .await?;

    let mut collected = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if !chunk.is_final {
            collected.push_str(&chunk.delta);
        }
    }
    assert!(collected.contains("사무직 회사원"));

    let session = db.sessions().get_session("s1").await?;
    assert_eq!(
        session.entries[0].ai_response.as_deref(),
        Some(collected.as_str())
    );
    Ok(())
}

#[tokio::test]
async fn test_stream_mirrors_into_account_history() -> Result<()> {
    let config = generation_config(4, Duration::from_secs(1));
    let chunks = vec!["guide ".to_owned(), "text".to_owned()];
    let (orchestrator, db, _dir) = build_orchestrator(Mode::Stream(chunks), config).await?;
    db.sessions().create_session("s1", 24).await?;
    let account = db
        .accounts()
        .create_account(
            "user@example.com",
            "secret-password",
            stretch_coach::database::accounts::AccountProfile::default(),
        )
        .await?;

    let (_entry, mut stream) = orchestrator
        .generate_stream("s1", sample_input(), Some(&account.id))
        .await?;
    while stream.next().await.is_some() {}

    let history = db.accounts().get_history(&account.id, 50, 0).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].ai_response.as_deref(), Some("guide text"));
    Ok(())
}
