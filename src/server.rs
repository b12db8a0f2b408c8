// ABOUTME: Server resource wiring, router assembly, and startup sequencing
// ABOUTME: Owns corpus initialization policy, the expiry sweep task, and graceful shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Stretch Coach Contributors

//! # Server
//!
//! [`ServerResources`] is the shared state handed to every route: database
//! managers, the corpus index, and the guide orchestrator. [`run`] wires the
//! resources from configuration, initializes the corpus according to the
//! `CORPUS_REQUIRED` policy, starts the session expiry sweeper, and serves
//! the router until shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::corpus::CorpusIndex;
use crate::database::{AccountManager, Database, SessionManager};
use crate::errors::{AppError, AppResult};
use crate::llm::{GenerationProvider, OpenAiCompatibleProvider};
use crate::routes::{AccountRoutes, HealthRoutes, SessionRoutes};
use crate::services::GuideOrchestrator;

/// Shared state for all route handlers
pub struct ServerResources {
    pub database: Database,
    pub sessions: Arc<SessionManager>,
    pub accounts: Arc<AccountManager>,
    pub corpus: Arc<CorpusIndex>,
    pub provider: Arc<dyn GenerationProvider>,
    pub orchestrator: GuideOrchestrator,
    pub config: ServerConfig,
}

impl ServerResources {
    /// Wire all resources from configuration
    ///
    /// # Errors
    ///
    /// Returns an error when the database or the backend HTTP client cannot
    /// be created.
    pub async fn from_config(config: ServerConfig) -> AppResult<Self> {
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

        Ok(Self {
            database,
            sessions,
            accounts,
            corpus,
            provider,
            orchestrator,
            config,
        })
    }
}

/// Assemble the full application router
#[must_use]
pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .merge(SessionRoutes::routes(Arc::clone(&resources)))
        .merge(AccountRoutes::routes(Arc::clone(&resources)))
        .merge(HealthRoutes::routes(resources))
}

/// Run the server until shutdown
///
/// # Errors
///
/// Returns an error when startup wiring fails, when the corpus is required
/// but fails to load, or when the listener cannot bind.
pub async fn run(config: ServerConfig) -> AppResult<()> {
    let corpus_required = config.corpus_required;
    let bind_addr = format!("{}:{}", config.http_host, config.http_port);
    let sweep_interval = Duration::from_secs(config.session.sweep_interval_secs);

    let resources = Arc::new(ServerResources::from_config(config).await?);

    // Corpus load policy: required by default, degraded start opt-in
    match resources.corpus.initialize().await {
        Ok(()) => info!("Corpus index ready"),
        Err(e) if corpus_required => {
            error!("Corpus index failed to load and CORPUS_REQUIRED is set: {e}");
            return Err(e);
        }
        Err(e) => {
            warn!("Starting degraded, guides fall back to templates: {e}");
        }
    }

    spawn_expiry_sweeper(Arc::clone(&resources.sessions), sweep_interval);

    let app = router(Arc::clone(&resources));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::config(format!("Failed to bind {bind_addr}: {e}")))?;

    info!("Listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::internal(format!("Server error: {e}")))?;

    info!("Server stopped");
    Ok(())
}

/// Periodically purge expired sessions
fn spawn_expiry_sweeper(sessions: Arc<SessionManager>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick is fine, the sweep is cheap when idle
        loop {
            ticker.tick().await;
            match sessions.sweep_expired().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Swept expired sessions"),
                Err(e) => warn!("Session expiry sweep failed: {e}"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to install shutdown handler: {e}");
    }
}
