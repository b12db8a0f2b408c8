// ABOUTME: HTTP-level integration tests for session, account, and health routes
// ABOUTME: Runs the assembled router in-process against an unreachable backend
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use stretch_coach::config::{
    CorpusConfig, GenerationConfig, ServerConfig, SessionConfig,
};
use stretch_coach::corpus::CorpusIndex;
use stretch_coach::database::Database;
use stretch_coach::llm::{GenerationProvider, OpenAiCompatibleProvider};
use stretch_coach::server::{router, ServerResources};
use stretch_coach::services::GuideOrchestrator;
use tempfile::TempDir;
use tower::ServiceExt;

/// Build the application over a fresh database
///
/// The corpus paths do not exist and the backend address is unreachable, so
/// retrieval degrades to no results and generation falls back to the
/// deterministic guide. Both degradations are invisible to the HTTP caller.
async fn test_app() -> Result<(Router, TempDir)> {
    let dir = tempfile::tempdir()?;
    let config = ServerConfig {
        http_host: "127.0.0.1".into(),
        http_port: 0,
        database_url: format!("sqlite:{}/test.db", dir.path().display()),
        corpus_required: false,
        corpus: CorpusConfig {
            data_path: PathBuf::from("/nonexistent/exercises.json"),
            embeddings_path: PathBuf::from("/nonexistent/embeddings.json"),
            model_dir: PathBuf::from("/nonexistent/model"),
            model_id: "unused".into(),
        },
        generation: GenerationConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: None,
            model: "gpt-3.5-turbo".into(),
            gate_capacity: 4,
            gate_wait: Duration::from_secs(1),
            pool_capacity: 4,
            request_timeout: Duration::from_secs(2),
        },
        session: SessionConfig {
            ttl_hours: 24,
            sweep_interval_secs: 300,
        },
    };

    let database = Database::new(&config.database_url).await?;
    let sessions = Arc::new(database.sessions());
    let accounts = Arc::new(database.accounts());
    let corpus = Arc::new(CorpusIndex::new(config.corpus.clone()));
    let provider: Arc<dyn GenerationProvider> =
        Arc::new(OpenAiCompatibleProvider::new(config.generation.clone())?);
    let orchestrator = GuideOrchestrator::new(
        &config.generation,
        Arc::clone(&corpus),
        Arc::clone(&provider),
        Arc::clone(&sessions),
        Arc::clone(&accounts),
    );

    let resources = Arc::new(ServerResources {
        database,
        sessions,
        accounts,
        corpus,
        provider,
        orchestrator,
        config,
    });
    Ok((router(resources), dir))
}

async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&value)?)
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body)?).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

fn guide_request() -> Value {
    json!({
        "age": 28,
        "gender": "female",
        "occupation": "사무직 회사원",
        "lifestyle": "주 5일 근무, 하루 8시간 앉아서 일함",
        "selected_body_parts": "목, 어깨",
        "pain_level": 7,
        "pain_description": "장시간 컴퓨터 작업으로 인한 목과 어깨 통증"
    })
}

async fn create_session(app: &Router) -> Result<String> {
    let (status, body) = send_json(app, Method::POST, "/api/v1/sessions", None).await?;
    assert_eq!(status, StatusCode::CREATED);
    Ok(body["session_id"].as_str().unwrap().to_owned())
}

#[tokio::test]
async fn test_health_reports_degraded_corpus() -> Result<()> {
    let (app, _dir) = test_app().await?;
    let (status, body) = send_json(&app, Method::GET, "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["corpus_ready"], false);
    // Shallow checks never probe the backend
    assert!(body.get("backend_reachable").is_none());

    let (status, body) = send_json(&app, Method::GET, "/health?deep=true", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["backend_reachable"], false);
    Ok(())
}

#[tokio::test]
async fn test_create_session_sets_cookie() -> Result<()> {
    let (app, _dir) = test_app().await?;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/sessions")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()?;
    assert!(cookie.starts_with("session_id="));
    assert!(cookie.contains("HttpOnly"));
    Ok(())
}

#[tokio::test]
async fn test_get_unknown_session_is_404() -> Result<()> {
    let (app, _dir) = test_app().await?;
    let (status, _body) =
        send_json(&app, Method::GET, "/api/v1/sessions/no-such-session", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_guide_generation_degrades_to_fallback() -> Result<()> {
    let (app, _dir) = test_app().await?;
    let session_id = create_session(&app).await?;

    let uri = format!("/api/v1/sessions/{session_id}/stretching");
    let (status, body) = send_json(&app, Method::POST, &uri, Some(guide_request())).await?;
    assert_eq!(status, StatusCode::OK);
    let text = body["text"].as_str().unwrap();
    assert!(text.contains("사무직 회사원"));
    assert!(body["entry_id"].is_string());

    // The entry is visible in the session afterwards
    let uri = format!("/api/v1/sessions/{session_id}");
    let (status, body) = send_json(&app, Method::GET, &uri, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_questionnaire_is_400() -> Result<()> {
    let (app, _dir) = test_app().await?;
    let session_id = create_session(&app).await?;

    let mut request = guide_request();
    request["pain_level"] = json!(11);
    let uri = format!("/api/v1/sessions/{session_id}/stretching");
    let (status, body) = send_json(&app, Method::POST, &uri, Some(request)).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALUE_OUT_OF_RANGE");
    Ok(())
}

#[tokio::test]
async fn test_feedback_roundtrip() -> Result<()> {
    let (app, _dir) = test_app().await?;
    let session_id = create_session(&app).await?;

    let uri = format!("/api/v1/sessions/{session_id}/stretching");
    let (_status, body) = send_json(&app, Method::POST, &uri, Some(guide_request())).await?;
    let entry_id = body["entry_id"].as_str().unwrap().to_owned();

    let uri = format!("/api/v1/sessions/{session_id}/stretching/{entry_id}/feedback");
    let (status, body) = send_json(
        &app,
        Method::POST,
        &uri,
        Some(json!({"feedback": "도움이 되었어요"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], true);

    // Empty feedback is rejected
    let (status, _body) =
        send_json(&app, Method::POST, &uri, Some(json!({"feedback": ""}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_register_merges_session_history() -> Result<()> {
    let (app, _dir) = test_app().await?;
    let session_id = create_session(&app).await?;

    let uri = format!("/api/v1/sessions/{session_id}/stretching");
    send_json(&app, Method::POST, &uri, Some(guide_request())).await?;
    send_json(&app, Method::POST, &uri, Some(guide_request())).await?;

    let (status, body) = send_json(
        &app,
        Method::POST,
        "/api/v1/accounts",
        Some(json!({
            "email": "user@example.com",
            "password": "secret-password",
            "age": 28,
            "gender": "female",
            "session_id": session_id,
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["merged_entries"], 2);
    // Profile fields missing from the request are filled from the newest
    // session questionnaire
    assert_eq!(body["account"]["occupation"], "사무직 회사원");
    let account_id = body["account"]["id"].as_str().unwrap().to_owned();

    // The session is gone, its entries live in the account history
    let uri = format!("/api/v1/sessions/{session_id}");
    let (status, _body) = send_json(&app, Method::GET, &uri, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let uri = format!("/api/v1/accounts/{account_id}/history");
    let (status, body) = send_json(&app, Method::GET, &uri, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entries"].as_array().unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_register_validation() -> Result<()> {
    let (app, _dir) = test_app().await?;

    // Malformed email
    let (status, _body) = send_json(
        &app,
        Method::POST,
        "/api/v1/accounts",
        Some(json!({"email": "not-an-email", "password": "secret-password"})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Short password
    let (status, _body) = send_json(
        &app,
        Method::POST,
        "/api/v1/accounts",
        Some(json!({"email": "user@example.com", "password": "short"})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Duplicate email
    let valid = json!({"email": "user@example.com", "password": "secret-password"});
    let (status, _body) =
        send_json(&app, Method::POST, "/api/v1/accounts", Some(valid.clone())).await?;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _body) = send_json(&app, Method::POST, "/api/v1/accounts", Some(valid)).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn test_history_of_unknown_account_is_404() -> Result<()> {
    let (app, _dir) = test_app().await?;
    let (status, _body) = send_json(
        &app,
        Method::GET,
        "/api/v1/accounts/no-such-account/history",
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}
